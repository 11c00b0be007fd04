//! Scripted in-memory engine for unit tests.
//!
//! Archives are registered under `(path, offset)`; every entry is a list of
//! pre-decoded blocks.  Counters record how often the block primitives run so
//! tests can assert on fetch patterns.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{ArchiveEngine, ArchiveOffset, EngineOptions};
use crate::error::{EngineResult, ErrorCode};

#[derive(Debug, Clone, Default)]
pub(crate) struct MockEntry {
    pub name:       Option<String>,
    pub blocks:     Vec<Vec<u8>>,
    pub offset:     u64,
    pub encrypted:  bool,
    pub compressed: bool,
    pub imploded:   bool,
}

impl MockEntry {
    pub fn new(name: &str, blocks: Vec<Vec<u8>>) -> Self {
        Self { name: Some(name.to_owned()), blocks, ..Self::default() }
    }

    /// Split `data` into blocks of at most `block_size` bytes.
    pub fn chunked(name: &str, data: &[u8], block_size: usize) -> Self {
        Self::new(name, data.chunks(block_size).map(<[u8]>::to_vec).collect())
    }

    pub fn at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    fn unpacked_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.len() as u64).sum()
    }

    fn data(&self) -> Vec<u8> {
        self.blocks.concat()
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub handles_opened: Cell<u32>,
    pub handles_closed: Cell<u32>,
    pub cursors_opened: Cell<u32>,
    pub cursors_closed: Cell<u32>,
    pub blocks_decoded: Cell<u32>,
}

#[derive(Debug, Default)]
struct MockState {
    archives:   HashMap<(PathBuf, u64), Rc<Vec<MockEntry>>>,
    /// `(entry, block)` whose decode fails once with `Read`.
    fail_block: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockEngine {
    state:     Rc<RefCell<MockState>>,
    pub stats: Rc<MockStats>,
}

pub(crate) struct MockHandle {
    offset:  u64,
    entries: Rc<Vec<MockEntry>>,
}

pub(crate) struct MockCursor {
    index: u32,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(self, path: &str, offset: u64, entries: Vec<MockEntry>) -> Self {
        self.state
            .borrow_mut()
            .archives
            .insert((PathBuf::from(path), offset), Rc::new(entries));
        self
    }

    pub fn fail_block_once(&self, index: u32, block: u32) {
        self.state.borrow_mut().fail_block = Some((index, block));
    }

    fn entry<'h>(&self, handle: &'h MockHandle, index: u32) -> EngineResult<&'h MockEntry> {
        handle.entries.get(index as usize).ok_or(ErrorCode::Exist)
    }
}

impl ArchiveEngine for MockEngine {
    type Handle = MockHandle;
    type Cursor = MockCursor;

    fn open(&self, path: &Path, offset: ArchiveOffset, _: &EngineOptions) -> EngineResult<MockHandle> {
        let state = self.state.borrow();
        let found = match offset {
            ArchiveOffset::At(o) => state
                .archives
                .get(&(path.to_path_buf(), o))
                .map(|entries| (o, entries.clone())),
            ArchiveOffset::Detect => state
                .archives
                .iter()
                .filter(|((p, _), _)| p == path)
                .min_by_key(|((_, o), _)| *o)
                .map(|((_, o), entries)| (*o, entries.clone())),
        };
        let (offset, entries) = found.ok_or(ErrorCode::Open)?;
        self.stats.handles_opened.set(self.stats.handles_opened.get() + 1);
        Ok(MockHandle { offset, entries })
    }

    fn close(&self, _: MockHandle) -> EngineResult<()> {
        self.stats.handles_closed.set(self.stats.handles_closed.get() + 1);
        Ok(())
    }

    fn archive_packed_size(&self, handle: &MockHandle) -> EngineResult<u64> {
        self.archive_unpacked_size(handle)
    }

    fn archive_unpacked_size(&self, handle: &MockHandle) -> EngineResult<u64> {
        Ok(handle.entries.iter().map(MockEntry::unpacked_size).sum())
    }

    fn archive_offset(&self, handle: &MockHandle) -> EngineResult<u64> {
        Ok(handle.offset)
    }

    fn archive_version(&self, _: &MockHandle) -> EngineResult<u32> {
        Ok(1)
    }

    fn archive_files(&self, handle: &MockHandle) -> EngineResult<u32> {
        Ok(handle.entries.len() as u32)
    }

    fn file_packed_size(&self, handle: &MockHandle, index: u32) -> EngineResult<u64> {
        self.file_unpacked_size(handle, index)
    }

    fn file_unpacked_size(&self, handle: &MockHandle, index: u32) -> EngineResult<u64> {
        Ok(self.entry(handle, index)?.unpacked_size())
    }

    fn file_offset(&self, handle: &MockHandle, index: u32) -> EngineResult<u64> {
        Ok(self.entry(handle, index)?.offset)
    }

    fn file_blocks(&self, handle: &MockHandle, index: u32) -> EngineResult<u32> {
        Ok(self.entry(handle, index)?.blocks.len() as u32)
    }

    fn file_encrypted(&self, handle: &MockHandle, index: u32) -> EngineResult<bool> {
        Ok(self.entry(handle, index)?.encrypted)
    }

    fn file_compressed(&self, handle: &MockHandle, index: u32) -> EngineResult<bool> {
        Ok(self.entry(handle, index)?.compressed)
    }

    fn file_imploded(&self, handle: &MockHandle, index: u32) -> EngineResult<bool> {
        Ok(self.entry(handle, index)?.imploded)
    }

    fn file_number(&self, handle: &MockHandle, name: &str) -> EngineResult<u32> {
        handle
            .entries
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
            .map(|i| i as u32)
            .ok_or(ErrorCode::Exist)
    }

    fn file_name(&self, handle: &MockHandle, index: u32) -> EngineResult<Option<String>> {
        Ok(self.entry(handle, index)?.name.clone())
    }

    fn file_read(&self, handle: &MockHandle, index: u32, buf: &mut [u8]) -> EngineResult<u64> {
        let data = self.entry(handle, index)?.data();
        if buf.len() < data.len() {
            return Err(ErrorCode::Size);
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len() as u64)
    }

    fn block_open(&self, handle: &MockHandle, index: u32) -> EngineResult<MockCursor> {
        self.entry(handle, index)?;
        self.stats.cursors_opened.set(self.stats.cursors_opened.get() + 1);
        Ok(MockCursor { index })
    }

    fn block_close(&self, _: &MockHandle, _: MockCursor) -> EngineResult<()> {
        self.stats.cursors_closed.set(self.stats.cursors_closed.get() + 1);
        Ok(())
    }

    fn block_unpacked_size(&self, handle: &MockHandle, cursor: &MockCursor, block: u32) -> EngineResult<u64> {
        let entry = self.entry(handle, cursor.index)?;
        entry
            .blocks
            .get(block as usize)
            .map(|b| b.len() as u64)
            .ok_or(ErrorCode::Exist)
    }

    fn block_read(
        &self,
        handle: &MockHandle,
        cursor: &mut MockCursor,
        block:  u32,
        buf:    &mut [u8],
    ) -> EngineResult<u64> {
        {
            let mut state = self.state.borrow_mut();
            if state.fail_block == Some((cursor.index, block)) {
                state.fail_block = None;
                return Err(ErrorCode::Read);
            }
        }
        let entry = self.entry(handle, cursor.index)?;
        let data = entry.blocks.get(block as usize).ok_or(ErrorCode::Exist)?;
        if buf.len() < data.len() {
            return Err(ErrorCode::Size);
        }
        buf[..data.len()].copy_from_slice(data);
        self.stats.blocks_decoded.set(self.stats.blocks_decoded.get() + 1);
        Ok(data.len() as u64)
    }
}
