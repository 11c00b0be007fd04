//! Hash table and block table.
//!
//! Both tables are stored encrypted with fixed keys.  A hash entry maps a
//! pair of name hashes to a block index; a block entry describes where an
//! entry's data lives and how it is stored.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use super::crypto::{self, HashType};
use crate::error::{EngineResult, ErrorCode};

/// Hash slot that has never been used; ends a probe sequence.
pub const HASH_FREE:    u32 = 0xFFFF_FFFF;
/// Hash slot whose entry was deleted; a probe continues past it.
pub const HASH_DELETED: u32 = 0xFFFF_FFFE;

// ── Block flags ──────────────────────────────────────────────────────────────

pub const FLAG_IMPLODE:       u32 = 0x0000_0100;
pub const FLAG_COMPRESS:      u32 = 0x0000_0200;
pub const FLAG_ENCRYPTED:     u32 = 0x0001_0000;
pub const FLAG_FIX_KEY:       u32 = 0x0002_0000;
pub const FLAG_SINGLE_UNIT:   u32 = 0x0100_0000;
pub const FLAG_DELETE_MARKER: u32 = 0x0200_0000;
pub const FLAG_SECTOR_CRC:    u32 = 0x0400_0000;
pub const FLAG_EXISTS:        u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub name_a:      u32,
    pub name_b:      u32,
    pub locale:      u16,
    pub platform:    u16,
    pub block_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Position of the data relative to the archive header.
    pub offset:        u64,
    pub packed_size:   u32,
    pub unpacked_size: u32,
    pub flags:         u32,
}

impl BlockEntry {
    pub fn exists(&self)      -> bool { self.flags & FLAG_EXISTS != 0 && self.flags & FLAG_DELETE_MARKER == 0 }
    pub fn encrypted(&self)   -> bool { self.flags & FLAG_ENCRYPTED != 0 }
    pub fn fix_key(&self)     -> bool { self.flags & FLAG_FIX_KEY != 0 }
    pub fn imploded(&self)    -> bool { self.flags & FLAG_IMPLODE != 0 }
    pub fn compressed(&self)  -> bool { self.flags & FLAG_COMPRESS != 0 }
    pub fn single_unit(&self) -> bool { self.flags & FLAG_SINGLE_UNIT != 0 }

    /// Stored through any codec, implode included.
    pub fn packed(&self) -> bool {
        self.imploded() || self.compressed()
    }

    /// Number of decode units.
    pub fn blocks(&self, sector_size: u32) -> u32 {
        if self.unpacked_size == 0 {
            0
        } else if self.single_unit() {
            1
        } else {
            self.unpacked_size.div_ceil(sector_size)
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

fn read_words<R: Read + Seek>(reader: &mut R, pos: u64, count: usize, key: u32) -> EngineResult<Vec<u32>> {
    let len = count.checked_mul(16).ok_or(ErrorCode::Malloc)?;
    let mut raw = Vec::new();
    raw.try_reserve_exact(len).map_err(|_| ErrorCode::Malloc)?;
    raw.resize(len, 0);
    reader.seek(SeekFrom::Start(pos)).map_err(|_| ErrorCode::Seek)?;
    reader.read_exact(&mut raw).map_err(|_| ErrorCode::Read)?;

    let mut words = vec![0u32; count * 4];
    LittleEndian::read_u32_into(&raw, &mut words);
    crypto::decrypt_block(&mut words, key);
    Ok(words)
}

/// Read and decrypt `count` hash entries at absolute position `pos`.
pub fn read_hash_table<R: Read + Seek>(reader: &mut R, pos: u64, count: u32) -> EngineResult<Vec<HashEntry>> {
    let words = read_words(reader, pos, count as usize, crypto::hash_table_key())?;
    trace!(pos, count, "loaded hash table");
    Ok(words
        .chunks_exact(4)
        .map(|w| HashEntry {
            name_a:      w[0],
            name_b:      w[1],
            locale:      (w[2] & 0xFFFF) as u16,
            platform:    (w[2] >> 16) as u16,
            block_index: w[3],
        })
        .collect())
}

/// Read and decrypt `count` block entries at absolute position `pos`.
/// `hi_pos` is the absolute position of the high-16-bit offset extension.
pub fn read_block_table<R: Read + Seek>(
    reader: &mut R,
    pos:    u64,
    count:  u32,
    hi_pos: Option<u64>,
) -> EngineResult<Vec<BlockEntry>> {
    let words = read_words(reader, pos, count as usize, crypto::block_table_key())?;
    let mut blocks: Vec<BlockEntry> = words
        .chunks_exact(4)
        .map(|w| BlockEntry {
            offset:        w[0] as u64,
            packed_size:   w[1],
            unpacked_size: w[2],
            flags:         w[3],
        })
        .collect();

    if let Some(hi_pos) = hi_pos {
        let mut raw = vec![0u8; count as usize * 2];
        reader.seek(SeekFrom::Start(hi_pos)).map_err(|_| ErrorCode::Seek)?;
        reader.read_exact(&mut raw).map_err(|_| ErrorCode::Read)?;
        for (block, hi) in blocks.iter_mut().zip(raw.chunks_exact(2)) {
            block.offset |= (LittleEndian::read_u16(hi) as u64) << 32;
        }
    }
    trace!(pos, count, "loaded block table");
    Ok(blocks)
}

// ── Lookup ───────────────────────────────────────────────────────────────────

/// Probe the hash table for `name` and return its block index.
///
/// When several locales carry the same name the neutral one (locale 0) wins,
/// otherwise the first match in probe order.
pub fn lookup(table: &[HashEntry], name: &str) -> Option<u32> {
    if table.is_empty() {
        return None;
    }
    let start  = hash_string_index(name, table.len());
    let name_a = crypto::hash_string(name, HashType::NameA);
    let name_b = crypto::hash_string(name, HashType::NameB);

    let mut found = None;
    for i in 0..table.len() {
        let entry = &table[(start + i) % table.len()];
        if entry.block_index == HASH_FREE {
            break;
        }
        if entry.block_index == HASH_DELETED || entry.name_a != name_a || entry.name_b != name_b {
            continue;
        }
        if entry.locale == 0 {
            return Some(entry.block_index);
        }
        found.get_or_insert(entry.block_index);
    }
    found
}

fn hash_string_index(name: &str, len: usize) -> usize {
    crypto::hash_string(name, HashType::TableOffset) as usize % len
}
