//! MPQ string hashing and the table/sector cipher.
//!
//! Both are driven by one 0x500-entry table generated from a fixed seed:
//!
//!   rows 0x000..0x300  hash types 0-2 (table offset, name A, name B)
//!   rows 0x300..0x400  hash type 3 (file key)
//!   rows 0x400..0x500  cipher key mixing
//!
//! Cipher words are little-endian `u32`.  Trailing bytes that do not fill a
//! whole word are left in plain text, as the format stores them.

use byteorder::{ByteOrder, LittleEndian};

/// Seed of the keystream accumulator.
const CIPHER_SEED: u32 = 0xEEEE_EEEE;
const KEY_MIX: usize = 0x400;

pub static CRYPT_TABLE: [u32; 0x500] = build_crypt_table();

const fn build_crypt_table() -> [u32; 0x500] {
    let mut table = [0u32; 0x500];
    let mut seed: u32 = 0x0010_0001;
    let mut index1 = 0;
    while index1 < 0x100 {
        let mut index2 = index1;
        let mut i = 0;
        while i < 5 {
            seed = (seed * 125 + 3) % 0x2A_AAAB;
            let temp1 = (seed & 0xFFFF) << 16;
            seed = (seed * 125 + 3) % 0x2A_AAAB;
            let temp2 = seed & 0xFFFF;
            table[index2] = temp1 | temp2;
            index2 += 0x100;
            i += 1;
        }
        index1 += 1;
    }
    table
}

// ── Hashing ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    /// Start slot in the hash table.
    TableOffset = 0,
    NameA       = 1,
    NameB       = 2,
    /// Cipher key of a file or table.
    FileKey     = 3,
}

/// Hash `name` case-insensitively, treating `/` as `\`.
pub fn hash_string(name: &str, kind: HashType) -> u32 {
    let row = (kind as usize) << 8;
    let mut seed1: u32 = 0x7FED_7FED;
    let mut seed2: u32 = CIPHER_SEED;
    for &byte in name.as_bytes() {
        let ch = match byte.to_ascii_uppercase() {
            b'/' => b'\\',
            c    => c,
        } as u32;
        seed1 = CRYPT_TABLE[row + ch as usize] ^ seed1.wrapping_add(seed2);
        seed2 = ch
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }
    seed1
}

/// Key of the hash table.
pub fn hash_table_key() -> u32 {
    hash_string("(hash table)", HashType::FileKey)
}

/// Key of the block table.
pub fn block_table_key() -> u32 {
    hash_string("(block table)", HashType::FileKey)
}

/// Cipher key of a file, derived from its name with any directory stripped.
///
/// `fix_key` entries mix in their position and size so identical files in
/// one archive do not share a keystream.
pub fn file_key(name: &str, offset: u64, unpacked_size: u32, fix_key: bool) -> u32 {
    let plain = name.rsplit(['\\', '/']).next().unwrap_or(name);
    let key = hash_string(plain, HashType::FileKey);
    if fix_key {
        key.wrapping_add(offset as u32) ^ unpacked_size
    } else {
        key
    }
}

// ── Cipher ───────────────────────────────────────────────────────────────────

#[inline]
fn next_key(key: u32) -> u32 {
    ((!key << 0x15).wrapping_add(0x1111_1111)) | (key >> 0x0B)
}

pub fn decrypt_block(data: &mut [u32], mut key: u32) {
    let mut seed = CIPHER_SEED;
    for word in data.iter_mut() {
        seed = seed.wrapping_add(CRYPT_TABLE[KEY_MIX + (key & 0xFF) as usize]);
        let plain = *word ^ key.wrapping_add(seed);
        key = next_key(key);
        seed = plain.wrapping_add(seed).wrapping_add(seed << 5).wrapping_add(3);
        *word = plain;
    }
}

pub fn encrypt_block(data: &mut [u32], mut key: u32) {
    let mut seed = CIPHER_SEED;
    for word in data.iter_mut() {
        seed = seed.wrapping_add(CRYPT_TABLE[KEY_MIX + (key & 0xFF) as usize]);
        let plain = *word;
        *word = plain ^ key.wrapping_add(seed);
        key = next_key(key);
        seed = plain.wrapping_add(seed).wrapping_add(seed << 5).wrapping_add(3);
    }
}

fn with_words(data: &mut [u8], f: impl FnOnce(&mut [u32])) {
    let whole = data.len() & !3;
    let mut words = vec![0u32; whole / 4];
    LittleEndian::read_u32_into(&data[..whole], &mut words);
    f(&mut words);
    LittleEndian::write_u32_into(&words, &mut data[..whole]);
}

/// Decrypt the whole words of a byte buffer in place.
pub fn decrypt_bytes(data: &mut [u8], key: u32) {
    with_words(data, |words| decrypt_block(words, key));
}

/// Encrypt the whole words of a byte buffer in place.
pub fn encrypt_bytes(data: &mut [u8], key: u32) {
    with_words(data, |words| encrypt_block(words, key));
}

/// Recover the key of a sectored file from its encrypted sector offset table.
///
/// The first offset is known in plain text (the table size, `decrypted0`),
/// which pins the key down to 256 candidates; the second offset must then
/// decode to something no larger than one sector past the first.
pub fn detect_file_key(encrypted: [u32; 2], decrypted0: u32, sector_size: u32) -> Option<u32> {
    let key_sum = (encrypted[0] ^ decrypted0).wrapping_sub(CIPHER_SEED);
    for i in 0..0x100 {
        let key1 = key_sum.wrapping_sub(CRYPT_TABLE[KEY_MIX + i]);
        let mut seed = CIPHER_SEED.wrapping_add(CRYPT_TABLE[KEY_MIX + (key1 & 0xFF) as usize]);
        let plain0 = encrypted[0] ^ key1.wrapping_add(seed);
        if plain0 != decrypted0 {
            continue;
        }

        let key2 = next_key(key1);
        seed = plain0.wrapping_add(seed).wrapping_add(seed << 5).wrapping_add(3);
        seed = seed.wrapping_add(CRYPT_TABLE[KEY_MIX + (key2 & 0xFF) as usize]);
        let plain1 = encrypted[1] ^ key2.wrapping_add(seed);
        if plain1 <= plain0.wrapping_add(sector_size) {
            // The offset table is encrypted with the file key minus one.
            return Some(key1.wrapping_add(1));
        }
    }
    None
}
