//! Streaming reader over one entry's decoded bytes.
//!
//! Blocks are decoded strictly in order: block `n + 1` may depend on state
//! the engine built while decoding block `n`, so a block is never addressed
//! out of sequence.  Consequences:
//! - a forward seek decodes and discards the intervening bytes;
//! - a backward seek restarts at block 0 and replays up to the target.
//!
//! Both cost O(target) decoded bytes once the target lies outside the
//! buffered region.
//!
//! # Buffer
//! Decoded blocks are appended to `buffer`; `head` marks the first byte not
//! yet delivered.  Consumed bytes are compacted away before the next append.

use std::cmp;
use std::io::{self, Read, Seek, SeekFrom};
use std::mem;

use tracing::{debug, trace, warn};

use crate::engine::ArchiveEngine;
use crate::entry::Entry;
use crate::error::{Error, ErrorCode, Result, StateKind};

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

pub struct Reader<'a, E: ArchiveEngine> {
    entry:    Entry<'a, E>,
    cursor:   Option<E::Cursor>,
    buffer:   Vec<u8>,
    head:     usize,
    /// Next block to decode.
    block:    u32,
    /// Bytes delivered since the start of the stream.
    position: u64,
}

impl<'a, E: ArchiveEngine> Reader<'a, E> {
    pub(crate) fn new(entry: Entry<'a, E>) -> Result<Self> {
        let archive = entry.archive();
        let cursor  = archive.engine().block_open(archive.handle()?, entry.index())?;
        trace!(index = entry.index(), "opened block cursor");
        Ok(Self {
            entry,
            cursor:   Some(cursor),
            buffer:   Vec::new(),
            head:     0,
            block:    0,
            position: 0,
        })
    }

    pub fn entry(&self) -> &Entry<'a, E> {
        &self.entry
    }

    /// Current logical position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Decoded bytes held but not yet delivered.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.head
    }

    /// Index of the next block the reader will decode.
    pub fn next_block(&self) -> u32 {
        self.block
    }

    // ── Block assembly ───────────────────────────────────────────────────────

    /// Decode the next block onto the buffer.  Returns `false` when the engine
    /// reports no block at the current index (end of stream).
    ///
    /// On failure the buffer and block index are left as they were.
    fn fetch_block(&mut self) -> Result<bool> {
        let archive = self.entry.archive();
        let engine  = archive.engine();
        let handle  = archive.handle()?;
        let cursor  = self.cursor.as_mut().ok_or(Error::State(StateKind::Uninitialized))?;

        let size = match engine.block_unpacked_size(handle, cursor, self.block) {
            Ok(size)               => size,
            Err(ErrorCode::Exist)  => {
                trace!(index = self.entry.index(), block = self.block, "end of blocks");
                return Ok(false);
            }
            Err(code)              => return Err(code.into()),
        };
        let size = usize::try_from(size).map_err(|_| Error::Resource)?;

        if self.head > 0 {
            self.buffer.drain(..self.head);
            self.head = 0;
        }
        let start = self.buffer.len();
        self.buffer.try_reserve(size).map_err(|_| Error::Resource)?;
        self.buffer.resize(start + size, 0);

        match engine.block_read(handle, cursor, self.block, &mut self.buffer[start..]) {
            Ok(written) => {
                let written = cmp::min(written as usize, size);
                self.buffer.truncate(start + written);
            }
            Err(code) => {
                self.buffer.truncate(start);
                return Err(code.into());
            }
        }

        trace!(index = self.entry.index(), block = self.block, size, "decoded block");
        self.block += 1;
        Ok(true)
    }

    /// Decode blocks until at least `want` bytes are buffered, or until the
    /// stream ends.  `None` decodes every remaining block.
    fn fill(&mut self, want: Option<usize>) -> Result<()> {
        loop {
            if let Some(want) = want {
                if self.buffered() >= want {
                    return Ok(());
                }
            }
            if !self.fetch_block()? {
                return Ok(());
            }
        }
    }

    fn take_prefix(&mut self, n: usize) -> Vec<u8> {
        let n = cmp::min(n, self.buffered());
        let out = if self.head == 0 && n == self.buffer.len() {
            mem::take(&mut self.buffer)
        } else {
            let out = self.buffer[self.head..self.head + n].to_vec();
            self.head += n;
            out
        };
        self.position += out.len() as u64;
        out
    }

    // ── Reading ──────────────────────────────────────────────────────────────

    /// Read up to `limit` bytes, or everything left when `limit` is `None`.
    ///
    /// Fewer bytes than asked are returned only at end of stream.  Reading at
    /// the end returns an empty vector.
    pub fn read_bytes(&mut self, limit: Option<usize>) -> Result<Vec<u8>> {
        self.fill(limit)?;
        let n = limit.unwrap_or(usize::MAX);
        Ok(self.take_prefix(n))
    }

    /// Drain the rest of the entry.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read_bytes(None)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.buffered() == 0 {
            self.fill(Some(1))?;
        }
        if self.buffered() == 0 {
            return Ok(None);
        }
        let byte = self.buffer[self.head];
        self.head += 1;
        self.position += 1;
        Ok(Some(byte))
    }

    /// Give back the byte returned by the last `read_byte`.  Same outcome as
    /// seeking one byte backwards, without the replay.
    fn unread_byte(&mut self) {
        debug_assert!(self.head > 0);
        self.head -= 1;
        self.position -= 1;
    }

    /// Decode and drop `n` bytes.  Stops early at end of stream.
    fn skip(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            if self.buffered() == 0 && !self.fetch_block()? {
                break;
            }
            let step = cmp::min(n, self.buffered() as u64) as usize;
            self.head     += step;
            self.position += step as u64;
            n             -= step as u64;
        }
        Ok(())
    }

    // ── Seeking ──────────────────────────────────────────────────────────────

    /// Forget all progress: block 0, empty buffer, position 0.  The engine
    /// cursor is kept.
    pub fn restart(&mut self) {
        self.block    = 0;
        self.position = 0;
        self.head     = 0;
        self.buffer.clear();
    }

    /// Move to a new position and return it.
    ///
    /// `SeekFrom::End` is relative to the entry's unpacked size.  A target
    /// before the start fails with [`Error::Precondition`].  A target past the
    /// end leaves the reader at the end; the returned position tells where it
    /// stopped.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset)   => Some(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
            SeekFrom::End(offset)     => self.entry.unpacked_size().checked_add_signed(offset),
        }
        .ok_or_else(|| Error::precondition(format!("invalid seek {pos:?} from {}", self.position)))?;

        if target < self.position {
            debug!(index = self.entry.index(), from = self.position, to = target, "replaying from block 0");
            self.restart();
        }
        self.skip(target - self.position)?;
        Ok(self.position)
    }

    // ── Lines ────────────────────────────────────────────────────────────────

    /// Next line, terminators included.  A line ends where a byte that is not
    /// `\r` or `\n` follows one that is; that byte starts the next line.
    /// Returns `None` once no bytes remain.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line: Vec<u8> = Vec::new();
        while let Some(byte) = self.read_byte()? {
            let after_terminator = line.last().is_some_and(|&prev| is_terminator(prev));
            if after_terminator && !is_terminator(byte) {
                self.unread_byte();
                break;
            }
            line.push(byte);
        }
        Ok(if line.is_empty() { None } else { Some(line) })
    }

    /// Iterate over the remaining lines.  See [`Reader::next_line`].
    pub fn lines(&mut self) -> Lines<'_, 'a, E> {
        Lines { reader: self, failed: false }
    }
}

impl<E: ArchiveEngine> Drop for Reader<'_, E> {
    fn drop(&mut self) {
        let Some(cursor) = self.cursor.take() else { return };
        let archive = self.entry.archive();
        match archive.handle() {
            Ok(handle) => {
                if let Err(code) = archive.engine().block_close(handle, cursor) {
                    warn!(index = self.entry.index(), %code, "failed to close block cursor");
                }
            }
            Err(_) => warn!(index = self.entry.index(), "archive closed before block cursor"),
        }
    }
}

// ── Lines ─────────────────────────────────────────────────────────────────────

/// Iterator returned by [`Reader::lines`].  Stops after the first error.
pub struct Lines<'r, 'a, E: ArchiveEngine> {
    reader: &'r mut Reader<'a, E>,
    failed: bool,
}

impl<E: ArchiveEngine> Iterator for Lines<'_, '_, E> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.reader.next_line().transpose();
        self.failed = matches!(next, Some(Err(_)));
        next
    }
}

// ── std::io adapters ──────────────────────────────────────────────────────────

impl<E: ArchiveEngine> Read for Reader<'_, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            self.fill(Some(1))?;
        }
        let n = cmp::min(buf.len(), self.buffered());
        buf[..n].copy_from_slice(&self.buffer[self.head..self.head + n]);
        self.head     += n;
        self.position += n as u64;
        Ok(n)
    }
}

impl<E: ArchiveEngine> Seek for Reader<'_, E> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(Reader::seek(self, pos)?)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}
