//! Narrow primitive interface to an archive engine.
//!
//! The core ([`Archive`](crate::Archive), [`Entry`](crate::Entry),
//! [`Reader`](crate::Reader)) never touches archive bytes itself.  Everything
//! that knows about hash tables, sector layouts, ciphers or codecs lives
//! behind [`ArchiveEngine`].  The crate ships one implementation,
//! [`NativeEngine`](crate::native::NativeEngine).
//!
//! # Handles
//! An engine hands out two kinds of opaque state:
//! - `Handle`: one per opened container.  Consumed by [`ArchiveEngine::close`].
//! - `Cursor`: one per streaming reader over an entry.  Consumed by
//!   [`ArchiveEngine::block_close`].
//!
//! Neither is ever cloned by the core; ownership is what guarantees each is
//! released exactly once.

#[cfg(test)]
pub(crate) mod mock;

use std::path::Path;

use crate::error::EngineResult;

/// Where the container starts inside its backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOffset {
    /// Let the engine locate the container header ("whole file").
    Detect,
    /// The container header is at this absolute byte offset.
    At(u64),
}

impl ArchiveOffset {
    /// Raw form used by C engines: `-1` for [`ArchiveOffset::Detect`].
    /// For engine adapters that pass the offset through to such a library.
    pub fn raw(self) -> i64 {
        match self {
            ArchiveOffset::Detect => -1,
            ArchiveOffset::At(o)  => o as i64,
        }
    }
}

/// Settings an engine may honour when opening a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Decode `(listfile)` at open time to learn entry names.
    pub load_listfile: bool,
    /// Upper bound in bytes for header detection with [`ArchiveOffset::Detect`].
    pub search_limit:  Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { load_listfile: true, search_limit: None }
    }
}

pub trait ArchiveEngine {
    type Handle;
    type Cursor;

    // ── Container lifecycle ─────────────────────────────────────────────────

    fn open(&self, path: &Path, offset: ArchiveOffset, options: &EngineOptions)
        -> EngineResult<Self::Handle>;
    fn close(&self, handle: Self::Handle) -> EngineResult<()>;

    // ── Container metadata ──────────────────────────────────────────────────

    fn archive_packed_size(&self, handle: &Self::Handle)   -> EngineResult<u64>;
    fn archive_unpacked_size(&self, handle: &Self::Handle) -> EngineResult<u64>;
    fn archive_offset(&self, handle: &Self::Handle)        -> EngineResult<u64>;
    fn archive_version(&self, handle: &Self::Handle)       -> EngineResult<u32>;
    fn archive_files(&self, handle: &Self::Handle)         -> EngineResult<u32>;

    // ── Entry metadata ──────────────────────────────────────────────────────

    fn file_packed_size(&self, handle: &Self::Handle, index: u32)   -> EngineResult<u64>;
    fn file_unpacked_size(&self, handle: &Self::Handle, index: u32) -> EngineResult<u64>;
    fn file_offset(&self, handle: &Self::Handle, index: u32)        -> EngineResult<u64>;
    fn file_blocks(&self, handle: &Self::Handle, index: u32)        -> EngineResult<u32>;
    fn file_encrypted(&self, handle: &Self::Handle, index: u32)     -> EngineResult<bool>;
    fn file_compressed(&self, handle: &Self::Handle, index: u32)    -> EngineResult<bool>;
    fn file_imploded(&self, handle: &Self::Handle, index: u32)      -> EngineResult<bool>;

    /// Resolve an entry name to its index.  Missing names yield
    /// [`ErrorCode::Exist`](crate::error::ErrorCode::Exist).
    fn file_number(&self, handle: &Self::Handle, name: &str) -> EngineResult<u32>;

    /// Known name of an entry, if the engine has learned one.
    fn file_name(&self, _handle: &Self::Handle, _index: u32) -> EngineResult<Option<String>> {
        Ok(None)
    }

    /// Decode the whole entry into `buf`, which must hold at least
    /// `file_unpacked_size` bytes.  Returns the number of bytes written.
    fn file_read(&self, handle: &Self::Handle, index: u32, buf: &mut [u8]) -> EngineResult<u64>;

    // ── Block primitives ────────────────────────────────────────────────────

    fn block_open(&self, handle: &Self::Handle, index: u32) -> EngineResult<Self::Cursor>;
    fn block_close(&self, handle: &Self::Handle, cursor: Self::Cursor) -> EngineResult<()>;

    /// Decompressed size of `block`.  A block index past the last block
    /// yields [`ErrorCode::Exist`](crate::error::ErrorCode::Exist).
    fn block_unpacked_size(&self, handle: &Self::Handle, cursor: &Self::Cursor, block: u32)
        -> EngineResult<u64>;

    /// Decode `block` into `buf`, sized by [`ArchiveEngine::block_unpacked_size`].
    /// Returns the number of bytes written.
    fn block_read(
        &self,
        handle: &Self::Handle,
        cursor: &mut Self::Cursor,
        block:  u32,
        buf:    &mut [u8],
    ) -> EngineResult<u64>;
}
