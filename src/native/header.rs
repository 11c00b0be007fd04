//! Archive header and user-data header.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0x00  u32  magic 'MPQ\x1A'
//! 0x04  u32  header size
//! 0x08  u32  archive size
//! 0x0C  u16  format version (0 = classic, 1 = extended)
//! 0x0E  u16  sector shift (sector size = 512 << shift)
//! 0x10  u32  hash table position
//! 0x14  u32  block table position
//! 0x18  u32  hash table entries
//! 0x1C  u32  block table entries
//! ── format version >= 1 ──
//! 0x20  u64  hi-block table position
//! 0x28  u16  hash table position, high 16 bits
//! 0x2A  u16  block table position, high 16 bits
//! ```
//!
//! A user-data header ('MPQ\x1B') may precede the archive header and points
//! at it.  Table positions are relative to the archive header.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, trace};

use crate::engine::ArchiveOffset;
use crate::error::{EngineResult, ErrorCode};

pub const MPQ_MAGIC:       u32 = 0x1A51_504D;
pub const USER_DATA_MAGIC: u32 = 0x1B51_504D;

pub const HEADER_SIZE_V1: u32 = 0x20;
pub const HEADER_SIZE_V2: u32 = 0x2C;

/// Headers are only ever found on this alignment.
pub const HEADER_ALIGN: u64 = 0x200;

/// Highest format version whose classic tables this reader understands.
const MAX_FORMAT_VERSION: u16 = 3;

/// `512 << 22` is the largest sector size that fits in a `u32`.
const MAX_SECTOR_SHIFT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub header_size:        u32,
    pub archive_size:       u32,
    pub format_version:     u16,
    pub sector_shift:       u16,
    pub hash_table_pos:     u64,
    pub block_table_pos:    u64,
    pub hash_table_size:    u32,
    pub block_table_size:   u32,
    pub hi_block_table_pos: Option<u64>,
}

impl Header {
    pub fn sector_size(&self) -> u32 {
        512u32 << self.sector_shift
    }

    /// Parse the fields following the magic.
    pub fn read<R: Read>(mut reader: R) -> EngineResult<Self> {
        let header_size    = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let archive_size   = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let format_version = reader.read_u16::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let sector_shift   = reader.read_u16::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let hash_lo        = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let block_lo       = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let hash_table_size  = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
        let block_table_size = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;

        if format_version > MAX_FORMAT_VERSION || sector_shift > MAX_SECTOR_SHIFT {
            debug!(format_version, sector_shift, "unsupported archive header");
            return Err(ErrorCode::Format);
        }

        let mut header = Header {
            header_size,
            archive_size,
            format_version,
            sector_shift,
            hash_table_pos:     hash_lo as u64,
            block_table_pos:    block_lo as u64,
            hash_table_size,
            block_table_size,
            hi_block_table_pos: None,
        };

        if format_version >= 1 && header_size >= HEADER_SIZE_V2 {
            let hi_block = reader.read_u64::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
            let hash_hi  = reader.read_u16::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
            let block_hi = reader.read_u16::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
            header.hash_table_pos  |= (hash_hi as u64) << 32;
            header.block_table_pos |= (block_hi as u64) << 32;
            header.hi_block_table_pos = (hi_block != 0).then_some(hi_block);
        }
        Ok(header)
    }
}

fn read_magic<R: Read + Seek>(reader: &mut R, pos: u64) -> EngineResult<Option<u32>> {
    reader.seek(SeekFrom::Start(pos)).map_err(|_| ErrorCode::Seek)?;
    match reader.read_u32::<LittleEndian>() {
        Ok(magic) => Ok(Some(magic)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(_) => Err(ErrorCode::Read),
    }
}

/// Try the header at `pos`, following a user-data header if one is there.
/// Returns the absolute archive offset and the header.
fn header_at<R: Read + Seek>(reader: &mut R, pos: u64) -> EngineResult<Option<(u64, Header)>> {
    match read_magic(reader, pos)? {
        Some(MPQ_MAGIC) => Ok(Some((pos, Header::read(&mut *reader)?))),
        Some(USER_DATA_MAGIC) => {
            let _user_data_size = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
            let header_offset   = reader.read_u32::<LittleEndian>().map_err(|_| ErrorCode::Read)?;
            let target = pos + header_offset as u64;
            trace!(pos, target, "following user data header");
            if header_offset == 0 || read_magic(reader, target)? != Some(MPQ_MAGIC) {
                return Ok(None);
            }
            Ok(Some((target, Header::read(&mut *reader)?)))
        }
        _ => Ok(None),
    }
}

/// Find the archive header.
///
/// With [`ArchiveOffset::At`] the header (or a user-data header) must sit at
/// exactly that position.  With [`ArchiveOffset::Detect`] every 512-byte
/// boundary is tried from the start of the file, up to `search_limit`.
pub fn locate<R: Read + Seek>(
    reader:       &mut R,
    offset:       ArchiveOffset,
    search_limit: Option<u64>,
) -> EngineResult<(u64, Header)> {
    match offset {
        ArchiveOffset::At(pos) => header_at(reader, pos)?.ok_or(ErrorCode::Format),
        ArchiveOffset::Detect => {
            let len = reader.seek(SeekFrom::End(0)).map_err(|_| ErrorCode::Seek)?;
            let end = search_limit.map_or(len, |limit| limit.min(len));
            let mut pos = 0;
            while pos < end {
                match header_at(reader, pos) {
                    Ok(Some(found)) => return Ok(found),
                    Ok(None) => {}
                    // A stray magic in leading data; keep scanning.
                    Err(ErrorCode::Format | ErrorCode::Read) => {
                        trace!(pos, "unparsable header candidate");
                    }
                    Err(code) => return Err(code),
                }
                pos += HEADER_ALIGN;
            }
            debug!(searched = end, "no archive header found");
            Err(ErrorCode::Format)
        }
    }
}
