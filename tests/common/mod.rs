//! Builds synthetic MPQ images for tests and benches.
#![allow(dead_code)]

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use mpqstream::native::tables::{
    FLAG_COMPRESS, FLAG_ENCRYPTED, FLAG_EXISTS, FLAG_FIX_KEY, FLAG_SINGLE_UNIT, HASH_FREE,
};
use mpqstream::native::{codec, crypto, header, hash_string, HashType, LISTFILE};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Packing {
    #[default]
    Stored,
    Zlib,
    Bzip2,
    Lzma,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Storage {
    pub packing:     Packing,
    pub encrypted:   bool,
    pub fix_key:     bool,
    pub single_unit: bool,
}

impl Storage {
    pub fn stored() -> Self { Self::default() }
    pub fn zlib() -> Self { Self { packing: Packing::Zlib, ..Self::default() } }
    pub fn bzip2() -> Self { Self { packing: Packing::Bzip2, ..Self::default() } }
    pub fn lzma() -> Self { Self { packing: Packing::Lzma, ..Self::default() } }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn fix_key(mut self) -> Self {
        self.encrypted = true;
        self.fix_key = true;
        self
    }

    pub fn single_unit(mut self) -> Self {
        self.single_unit = true;
        self
    }
}

enum Item {
    File { name: String, data: Vec<u8>, storage: Storage },
    /// Block table slot without the exists flag.
    Deleted,
}

pub struct ImageBuilder {
    sector_shift: u16,
    v2:           bool,
    leading:      usize,
    user_data:    bool,
    listfile:     bool,
    items:        Vec<Item>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self { sector_shift: 0, v2: false, leading: 0, user_data: false, listfile: false, items: Vec::new() }
    }

    /// Sector size becomes `512 << shift`.
    pub fn sector_shift(mut self, shift: u16) -> Self {
        self.sector_shift = shift;
        self
    }

    /// Write the extended (format version 1) header.
    pub fn v2(mut self) -> Self {
        self.v2 = true;
        self
    }

    /// Put `sectors` × 512 bytes of junk before the header.
    pub fn leading_junk(mut self, sectors: usize) -> Self {
        self.leading = sectors * 512;
        self
    }

    /// Prefix the archive with a user data header pointing 512 bytes ahead.
    pub fn user_data(mut self) -> Self {
        self.user_data = true;
        self
    }

    /// Append an encrypted, compressed `(listfile)` naming every file.
    pub fn listfile(mut self) -> Self {
        self.listfile = true;
        self
    }

    pub fn file(mut self, name: &str, data: &[u8], storage: Storage) -> Self {
        self.items.push(Item::File { name: name.to_owned(), data: data.to_vec(), storage });
        self
    }

    pub fn deleted(mut self) -> Self {
        self.items.push(Item::Deleted);
        self
    }

    pub fn sector_size(&self) -> u32 {
        512 << self.sector_shift
    }

    /// Absolute position of the archive header in [`ImageBuilder::build`]'s output.
    pub fn archive_offset(&self) -> u64 {
        if self.user_data {
            512
        } else {
            self.leading as u64
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let header_size = if self.v2 { header::HEADER_SIZE_V2 } else { header::HEADER_SIZE_V1 };
        let sector      = self.sector_size();

        let listing = self
            .items
            .iter()
            .filter_map(|item| match item {
                Item::File { name, .. } => Some(name.as_str()),
                Item::Deleted => None,
            })
            .collect::<Vec<_>>()
            .join("\r\n")
            .into_bytes();

        let mut body   = vec![0u8; header_size as usize];
        let mut blocks: Vec<[u32; 4]> = Vec::new();
        let mut named:  Vec<(&str, u32)> = Vec::new();

        for item in &self.items {
            match item {
                Item::Deleted => blocks.push([body.len() as u32, 0, 0, 0]),
                Item::File { name, data, storage } => {
                    let offset = body.len() as u32;
                    let (stored, flags) = encode(name, data, *storage, offset, sector);
                    named.push((name.as_str(), blocks.len() as u32));
                    blocks.push([offset, stored.len() as u32, data.len() as u32, flags]);
                    body.extend(stored);
                }
            }
        }
        if self.listfile {
            let offset  = body.len() as u32;
            let storage = Storage::zlib().encrypted();
            let (stored, flags) = encode(LISTFILE, &listing, storage, offset, sector);
            named.push((LISTFILE, blocks.len() as u32));
            blocks.push([offset, stored.len() as u32, listing.len() as u32, flags]);
            body.extend(stored);
        }

        let slots = (named.len() as u32 * 2).next_power_of_two().max(16);
        let mut hash = vec![[u32::MAX, u32::MAX, u32::MAX, HASH_FREE]; slots as usize];
        for (name, block_index) in named {
            let mut i = (hash_string(name, HashType::TableOffset) % slots) as usize;
            while hash[i][3] != HASH_FREE {
                i = (i + 1) % slots as usize;
            }
            hash[i] = [
                hash_string(name, HashType::NameA),
                hash_string(name, HashType::NameB),
                0,
                block_index,
            ];
        }

        let hash_pos = body.len() as u32;
        append_encrypted(&mut body, hash.concat(), crypto::hash_table_key());
        let block_pos = body.len() as u32;
        append_encrypted(&mut body, blocks.concat(), crypto::block_table_key());

        let mut head = Vec::new();
        head.write_u32::<LittleEndian>(header::MPQ_MAGIC).unwrap();
        head.write_u32::<LittleEndian>(header_size).unwrap();
        head.write_u32::<LittleEndian>(body.len() as u32).unwrap();
        head.write_u16::<LittleEndian>(self.v2 as u16).unwrap();
        head.write_u16::<LittleEndian>(self.sector_shift).unwrap();
        head.write_u32::<LittleEndian>(hash_pos).unwrap();
        head.write_u32::<LittleEndian>(block_pos).unwrap();
        head.write_u32::<LittleEndian>(slots).unwrap();
        head.write_u32::<LittleEndian>(blocks.len() as u32).unwrap();
        if self.v2 {
            head.write_u64::<LittleEndian>(0).unwrap();
            head.write_u16::<LittleEndian>(0).unwrap();
            head.write_u16::<LittleEndian>(0).unwrap();
        }
        body[..head.len()].copy_from_slice(&head);

        let mut image = Vec::new();
        if self.user_data {
            image.write_u32::<LittleEndian>(header::USER_DATA_MAGIC).unwrap();
            image.write_u32::<LittleEndian>(0x100).unwrap();
            image.write_u32::<LittleEndian>(512).unwrap();
            image.write_u32::<LittleEndian>(16).unwrap();
            image.resize(512, 0);
        } else {
            image.resize(self.leading, 0xA5);
        }
        image.extend(body);
        image
    }

    pub fn write(&self) -> NamedTempFile {
        write_temp(&self.build())
    }
}

pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// Deterministic text with short lines.
pub fn text(len: usize) -> Vec<u8> {
    let line = b"the quick brown fox jumps over the lazy dog\r\n";
    line.iter().copied().cycle().take(len).collect()
}

/// Deterministic, poorly compressible bytes.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn append_encrypted(out: &mut Vec<u8>, mut words: Vec<u32>, key: u32) {
    crypto::encrypt_block(&mut words, key);
    for word in words {
        out.write_u32::<LittleEndian>(word).unwrap();
    }
}

fn compress(packing: Packing, data: &[u8]) -> Vec<u8> {
    let packed = match packing {
        Packing::Stored => return data.to_vec(),
        Packing::Zlib => {
            let mut enc = flate2::write::ZlibEncoder::new(vec![codec::MASK_ZLIB], flate2::Compression::best());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        Packing::Bzip2 => {
            let mut enc = bzip2::write::BzEncoder::new(vec![codec::MASK_BZIP2], bzip2::Compression::best());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        Packing::Lzma => {
            // Sectors keep the properties but not the 8-byte size field.
            let mut stream = Vec::new();
            lzma_rs::lzma_compress(&mut &data[..], &mut stream).unwrap();
            let mut out = vec![codec::MASK_LZMA, 0];
            out.extend_from_slice(&stream[..5]);
            out.extend_from_slice(&stream[13..]);
            out
        }
    };
    if packed.len() < data.len() { packed } else { data.to_vec() }
}

fn encode(name: &str, data: &[u8], storage: Storage, offset: u32, sector: u32) -> (Vec<u8>, u32) {
    let key = crypto::file_key(name, offset as u64, data.len() as u32, storage.fix_key);
    let mut flags = FLAG_EXISTS;
    if storage.encrypted   { flags |= FLAG_ENCRYPTED; }
    if storage.fix_key     { flags |= FLAG_FIX_KEY; }
    if storage.single_unit { flags |= FLAG_SINGLE_UNIT; }
    if storage.packing != Packing::Stored { flags |= FLAG_COMPRESS; }

    if storage.single_unit {
        let mut out = compress(storage.packing, data);
        if storage.encrypted {
            crypto::encrypt_bytes(&mut out, key);
        }
        return (out, flags);
    }

    if storage.packing == Packing::Stored {
        let mut out = data.to_vec();
        if storage.encrypted {
            for (i, chunk) in out.chunks_mut(sector as usize).enumerate() {
                crypto::encrypt_bytes(chunk, key.wrapping_add(i as u32));
            }
        }
        return (out, flags);
    }

    let mut sectors: Vec<Vec<u8>> = data.chunks(sector as usize).map(|c| compress(storage.packing, c)).collect();
    let mut offsets = vec![(sectors.len() as u32 + 1) * 4];
    for s in &sectors {
        offsets.push(offsets[offsets.len() - 1] + s.len() as u32);
    }
    if storage.encrypted {
        crypto::encrypt_block(&mut offsets, key.wrapping_sub(1));
        for (i, s) in sectors.iter_mut().enumerate() {
            crypto::encrypt_bytes(s, key.wrapping_add(i as u32));
        }
    }
    let mut out = Vec::new();
    for o in offsets {
        out.write_u32::<LittleEndian>(o).unwrap();
    }
    for s in sectors {
        out.extend(s);
    }
    (out, flags)
}
