//! Pure-Rust MPQ engine.
//!
//! ```text
//! [ user data header? ][ header ][ entry data ... ][ hash table ][ block table ][ hi-block table? ]
//! ```
//!
//! Entry `n` is the `n`-th block table entry flagged as existing.  Entry data
//! is either one unit (single-unit entries, or uncompressed entries cut at
//! fixed sector boundaries) or, for compressed entries, a run of sectors
//! addressed by an offset table stored in front of the data:
//!
//! ```text
//! [ u32 × (blocks + 1) sector offsets ][ sector 0 ][ sector 1 ] ...
//! ```
//!
//! Offsets are relative to the start of the entry data; sector `i` spans
//! `offsets[i]..offsets[i + 1]`.

pub mod codec;
pub mod crypto;
pub mod header;
pub mod tables;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};

use crate::engine::{ArchiveEngine, ArchiveOffset, EngineOptions};
use crate::error::{EngineResult, ErrorCode};
use header::Header;
use tables::{BlockEntry, HashEntry};

pub use crypto::{hash_string, HashType};

/// Name of the entry listing the archive's file names.
pub const LISTFILE: &str = "(listfile)";

/// The bundled engine.  Stateless; every [`NativeHandle`] owns its file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

pub struct NativeHandle {
    file:       File,
    path:       PathBuf,
    /// Absolute position of the archive header.
    offset:     u64,
    header:     Header,
    hash_table: Vec<HashEntry>,
    blocks:     Vec<BlockEntry>,
    /// Entry index → block table index, ascending.
    entries:    Vec<u32>,
    /// Names learned from the listfile or from lookups.
    names:      RefCell<HashMap<u32, String>>,
}

pub struct NativeCursor {
    layout: Layout,
}

// ── Entry layout ─────────────────────────────────────────────────────────────

/// Where each block of one entry is stored and how to decode it.
struct Layout {
    block:       BlockEntry,
    sector_size: u32,
    blocks:      u32,
    key:         Option<u32>,
    /// Sector boundaries for compressed multi-sector entries.
    offsets:     Option<Vec<u32>>,
}

impl Layout {
    fn unpacked_size(&self, n: u32) -> u32 {
        if self.block.single_unit() {
            self.block.unpacked_size
        } else {
            let start = n * self.sector_size;
            self.sector_size.min(self.block.unpacked_size - start)
        }
    }

    /// Stored position (relative to the entry data) and length of block `n`.
    fn stored_range(&self, n: u32) -> EngineResult<(u64, u32)> {
        if let Some(offsets) = &self.offsets {
            let start = offsets[n as usize];
            let end   = offsets[n as usize + 1];
            return Ok((start as u64, end - start));
        }
        if self.block.single_unit() {
            let len = if self.block.packed() { self.block.packed_size } else { self.block.unpacked_size };
            return Ok((0, len));
        }
        Ok((n as u64 * self.sector_size as u64, self.unpacked_size(n)))
    }
}

// ── Handle internals ─────────────────────────────────────────────────────────

impl NativeHandle {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> EngineResult<()> {
        let pos = self.offset.checked_add(pos).ok_or(ErrorCode::Seek)?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos)).map_err(|_| ErrorCode::Seek)?;
        file.read_exact(buf).map_err(|e| {
            trace!(pos, len = buf.len(), error = %e, "short read");
            ErrorCode::Read
        })
    }

    fn block(&self, index: u32) -> EngineResult<&BlockEntry> {
        let slot = *self.entries.get(index as usize).ok_or(ErrorCode::Exist)?;
        Ok(&self.blocks[slot as usize])
    }

    /// Resolve `name` and remember it for key derivation.
    fn number(&self, name: &str) -> EngineResult<u32> {
        let slot  = tables::lookup(&self.hash_table, name).ok_or(ErrorCode::Exist)?;
        let index = self.entries.binary_search(&slot).map_err(|_| ErrorCode::Exist)? as u32;
        self.names.borrow_mut().entry(index).or_insert_with(|| name.to_owned());
        Ok(index)
    }

    fn layout(&self, index: u32) -> EngineResult<Layout> {
        let block       = *self.block(index)?;
        let sector_size = self.header.sector_size();
        let blocks      = block.blocks(sector_size);

        let mut table = None;
        if block.packed() && !block.single_unit() && blocks > 0 {
            let words = blocks as usize + 1 + (block.flags & tables::FLAG_SECTOR_CRC != 0) as usize;
            let mut raw = vec![0u8; words * 4];
            self.read_at(block.offset, &mut raw)?;
            table = Some(raw);
        }

        let key = if !block.encrypted() || blocks == 0 {
            None
        } else if let Some(name) = self.names.borrow().get(&index) {
            Some(crypto::file_key(name, block.offset, block.unpacked_size, block.fix_key()))
        } else if let Some(raw) = &table {
            let encrypted = [LittleEndian::read_u32(&raw[0..4]), LittleEndian::read_u32(&raw[4..8])];
            let key = crypto::detect_file_key(encrypted, raw.len() as u32, sector_size);
            debug!(index, detected = key.is_some(), "recovering file key from sector table");
            Some(key.ok_or(ErrorCode::Decrypt)?)
        } else {
            debug!(index, "encrypted entry with unknown name");
            return Err(ErrorCode::Decrypt);
        };

        let offsets = match table {
            Some(mut raw) => {
                if let Some(key) = key {
                    crypto::decrypt_bytes(&mut raw, key.wrapping_sub(1));
                }
                let mut offsets = vec![0u32; blocks as usize + 1];
                LittleEndian::read_u32_into(&raw[..offsets.len() * 4], &mut offsets);
                if offsets.windows(2).any(|w| w[0] > w[1]) || offsets[blocks as usize] > block.packed_size {
                    debug!(index, "sector offset table out of order");
                    return Err(ErrorCode::Format);
                }
                Some(offsets)
            }
            None => None,
        };

        Ok(Layout { block, sector_size, blocks, key, offsets })
    }

    fn decode_block(&self, layout: &Layout, n: u32, out: &mut [u8]) -> EngineResult<()> {
        let (start, len) = layout.stored_range(n)?;
        let mut stored = Vec::new();
        stored.try_reserve_exact(len as usize).map_err(|_| ErrorCode::Malloc)?;
        stored.resize(len as usize, 0);
        self.read_at(layout.block.offset + start, &mut stored)?;

        if let Some(key) = layout.key {
            crypto::decrypt_bytes(&mut stored, key.wrapping_add(n));
        }
        codec::decode_sector(&stored, out, layout.block.compressed(), layout.block.imploded())
    }

    fn read_entry(&self, index: u32, buf: &mut [u8]) -> EngineResult<u64> {
        let layout = self.layout(index)?;
        let size   = layout.block.unpacked_size as usize;
        if buf.len() < size {
            return Err(ErrorCode::Size);
        }
        let mut pos = 0;
        for n in 0..layout.blocks {
            let len = layout.unpacked_size(n) as usize;
            self.decode_block(&layout, n, &mut buf[pos..pos + len])?;
            pos += len;
        }
        Ok(pos as u64)
    }

    fn load_listfile(&self) {
        let Ok(index) = self.number(LISTFILE) else {
            debug!(path = %self.path.display(), "archive has no listfile");
            return;
        };
        let Ok(size) = self.block(index).map(|block| block.unpacked_size as usize) else {
            return;
        };
        let mut data = vec![0u8; size];
        if let Err(code) = self.read_entry(index, &mut data) {
            warn!(path = %self.path.display(), %code, "failed to read listfile");
            return;
        }

        let text = String::from_utf8_lossy(&data);
        let mut known = 0usize;
        for name in text.split([';', '\r', '\n']).map(str::trim).filter(|n| !n.is_empty()) {
            if self.number(name).is_ok() {
                known += 1;
            }
        }
        debug!(path = %self.path.display(), known, "loaded listfile");
    }
}

// ── ArchiveEngine ────────────────────────────────────────────────────────────

impl ArchiveEngine for NativeEngine {
    type Handle = NativeHandle;
    type Cursor = NativeCursor;

    fn open(&self, path: &Path, offset: ArchiveOffset, options: &EngineOptions) -> EngineResult<NativeHandle> {
        let mut file = File::open(path).map_err(|e| {
            debug!(path = %path.display(), error = %e, "cannot open archive");
            ErrorCode::Open
        })?;
        let len = file.metadata().map_err(|_| ErrorCode::Open)?.len();

        let (archive_offset, header) = header::locate(&mut file, offset, options.search_limit)?;

        let hash_pos  = archive_offset + header.hash_table_pos;
        let block_pos = archive_offset + header.block_table_pos;
        let fits = |pos: u64, count: u32| pos.saturating_add(count as u64 * 16) <= len;
        if !fits(hash_pos, header.hash_table_size) || !fits(block_pos, header.block_table_size) {
            debug!(path = %path.display(), "tables extend past end of file");
            return Err(ErrorCode::Format);
        }

        let hash_table = tables::read_hash_table(&mut file, hash_pos, header.hash_table_size)?;
        let blocks = tables::read_block_table(
            &mut file,
            block_pos,
            header.block_table_size,
            header.hi_block_table_pos.map(|pos| archive_offset + pos),
        )?;
        let entries = blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.exists())
            .map(|(slot, _)| slot as u32)
            .collect::<Vec<_>>();

        debug!(
            path = %path.display(),
            offset = archive_offset,
            format_version = header.format_version,
            sector_size = header.sector_size(),
            entries = entries.len(),
            "opened native archive"
        );

        let handle = NativeHandle {
            file,
            path: path.to_path_buf(),
            offset: archive_offset,
            header,
            hash_table,
            blocks,
            entries,
            names: RefCell::new(HashMap::new()),
        };
        if options.load_listfile {
            handle.load_listfile();
        }
        Ok(handle)
    }

    fn close(&self, handle: NativeHandle) -> EngineResult<()> {
        trace!(path = %handle.path.display(), "closing native archive");
        drop(handle);
        Ok(())
    }

    fn archive_packed_size(&self, handle: &NativeHandle) -> EngineResult<u64> {
        Ok(handle.entries.iter().map(|&s| handle.blocks[s as usize].packed_size as u64).sum())
    }

    fn archive_unpacked_size(&self, handle: &NativeHandle) -> EngineResult<u64> {
        Ok(handle.entries.iter().map(|&s| handle.blocks[s as usize].unpacked_size as u64).sum())
    }

    fn archive_offset(&self, handle: &NativeHandle) -> EngineResult<u64> {
        Ok(handle.offset)
    }

    fn archive_version(&self, handle: &NativeHandle) -> EngineResult<u32> {
        Ok(handle.header.format_version as u32 + 1)
    }

    fn archive_files(&self, handle: &NativeHandle) -> EngineResult<u32> {
        Ok(handle.entries.len() as u32)
    }

    fn file_packed_size(&self, handle: &NativeHandle, index: u32) -> EngineResult<u64> {
        Ok(handle.block(index)?.packed_size as u64)
    }

    fn file_unpacked_size(&self, handle: &NativeHandle, index: u32) -> EngineResult<u64> {
        Ok(handle.block(index)?.unpacked_size as u64)
    }

    fn file_offset(&self, handle: &NativeHandle, index: u32) -> EngineResult<u64> {
        Ok(handle.block(index)?.offset)
    }

    fn file_blocks(&self, handle: &NativeHandle, index: u32) -> EngineResult<u32> {
        Ok(handle.block(index)?.blocks(handle.header.sector_size()))
    }

    fn file_encrypted(&self, handle: &NativeHandle, index: u32) -> EngineResult<bool> {
        Ok(handle.block(index)?.encrypted())
    }

    fn file_compressed(&self, handle: &NativeHandle, index: u32) -> EngineResult<bool> {
        Ok(handle.block(index)?.compressed())
    }

    fn file_imploded(&self, handle: &NativeHandle, index: u32) -> EngineResult<bool> {
        Ok(handle.block(index)?.imploded())
    }

    fn file_number(&self, handle: &NativeHandle, name: &str) -> EngineResult<u32> {
        handle.number(name)
    }

    fn file_name(&self, handle: &NativeHandle, index: u32) -> EngineResult<Option<String>> {
        handle.block(index)?;
        Ok(handle.names.borrow().get(&index).cloned())
    }

    fn file_read(&self, handle: &NativeHandle, index: u32, buf: &mut [u8]) -> EngineResult<u64> {
        handle.read_entry(index, buf)
    }

    fn block_open(&self, handle: &NativeHandle, index: u32) -> EngineResult<NativeCursor> {
        Ok(NativeCursor { layout: handle.layout(index)? })
    }

    fn block_close(&self, _: &NativeHandle, _: NativeCursor) -> EngineResult<()> {
        Ok(())
    }

    fn block_unpacked_size(&self, _: &NativeHandle, cursor: &NativeCursor, block: u32) -> EngineResult<u64> {
        if block >= cursor.layout.blocks {
            return Err(ErrorCode::Exist);
        }
        Ok(cursor.layout.unpacked_size(block) as u64)
    }

    fn block_read(
        &self,
        handle: &NativeHandle,
        cursor: &mut NativeCursor,
        block:  u32,
        buf:    &mut [u8],
    ) -> EngineResult<u64> {
        if block >= cursor.layout.blocks {
            return Err(ErrorCode::Exist);
        }
        let len = cursor.layout.unpacked_size(block) as usize;
        if buf.len() < len {
            return Err(ErrorCode::Size);
        }
        handle.decode_block(&cursor.layout, block, &mut buf[..len])?;
        Ok(len as u64)
    }
}
