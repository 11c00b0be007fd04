//! High-level [`Archive`] API: the container surface.
//!
//! ```no_run
//! use mpqstream::Archive;
//!
//! let archive = Archive::open("base.mpq")?;
//! let entry   = archive.entry("scripts\\settings.txt")?;
//!
//! // One-shot
//! let bytes = entry.read()?;
//!
//! // Streaming
//! let mut reader = entry.reader()?;
//! for line in reader.lines() {
//!     let line = line?;
//!     print!("{}", String::from_utf8_lossy(&line));
//! }
//! # Ok::<(), mpqstream::Error>(())
//! ```
//!
//! # Nesting
//! An archive may be stored verbatim (no compression, no encryption) as an
//! entry of another archive.  [`Archive::open_nested`] reopens the same
//! backing file at `parent offset + entry offset`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::OpenOptions;
use crate::engine::{ArchiveEngine, ArchiveOffset};
use crate::entry::Entry;
use crate::error::{Error, Result, StateKind};
use crate::native::NativeEngine;

// ── EntryKey ──────────────────────────────────────────────────────────────────

/// Lookup key for [`Archive::entry`]: a name or a table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKey<'k> {
    Name(&'k str),
    Index(u32),
}

impl<'k> From<&'k str> for EntryKey<'k> {
    fn from(name: &'k str) -> Self { EntryKey::Name(name) }
}

impl<'k> From<&'k String> for EntryKey<'k> {
    fn from(name: &'k String) -> Self { EntryKey::Name(name) }
}

impl From<u32> for EntryKey<'_> {
    fn from(index: u32) -> Self { EntryKey::Index(index) }
}

// ── ArchiveInfo ───────────────────────────────────────────────────────────────

/// Snapshot of the cached container metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    pub path:          PathBuf,
    pub offset:        u64,
    pub packed_size:   u64,
    pub unpacked_size: u64,
    pub version:       u32,
    pub files:         u32,
    pub depth:         usize,
}

// ── Nesting ───────────────────────────────────────────────────────────────────

/// Location of a container nested at `entry_offset` inside a container that
/// starts at `parent_offset` of `path`.
pub fn nested_location(path: &Path, parent_offset: u64, entry_offset: u64) -> Result<(PathBuf, u64)> {
    let offset = parent_offset.checked_add(entry_offset).ok_or_else(|| {
        Error::precondition(format!(
            "nested offset overflows: {parent_offset} + {entry_offset}"
        ))
    })?;
    Ok((path.to_path_buf(), offset))
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive<E: ArchiveEngine = NativeEngine> {
    engine:        E,
    handle:        Option<E::Handle>,
    path:          PathBuf,
    offset:        u64,
    packed_size:   u64,
    unpacked_size: u64,
    version:       u32,
    files:         u32,
    options:       OpenOptions,
    /// Offsets of the enclosing containers, outermost first.
    ancestors:     Vec<u64>,
}

impl Archive<NativeEngine> {
    /// Open `path` with the bundled engine, detecting the header offset.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, OpenOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        Self::open_with(NativeEngine, path, ArchiveOffset::Detect, options)
    }
}

impl<E: ArchiveEngine> Archive<E> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open a container through `engine`.  The engine handle is acquired
    /// first; if any metadata fetch fails afterwards the handle is released
    /// before the error is returned.
    pub fn open_with<P: AsRef<Path>>(
        engine:  E,
        path:    P,
        offset:  ArchiveOffset,
        options: OpenOptions,
    ) -> Result<Self> {
        let path   = path.as_ref().to_path_buf();
        let handle = engine.open(&path, offset, &options.engine_options())?;

        let mut archive = Self {
            engine,
            handle:        Some(handle),
            path,
            offset:        0,
            packed_size:   0,
            unpacked_size: 0,
            version:       0,
            files:         0,
            options,
            ancestors:     Vec::new(),
        };
        archive.load_metadata()?;

        debug!(
            path = %archive.path.display(),
            offset = archive.offset,
            version = archive.version,
            files = archive.files,
            "opened archive"
        );
        Ok(archive)
    }

    /// Open the container stored inside `entry`.
    ///
    /// The entry must be stored raw: an encrypted, compressed or imploded
    /// entry is rejected with [`Error::Precondition`], as is nesting deeper
    /// than [`OpenOptions::max_nesting_depth`] or an offset that repeats an
    /// enclosing container.
    pub fn open_nested(entry: &Entry<'_, E>) -> Result<Self>
    where
        E: Clone,
    {
        if entry.is_encrypted() || entry.is_compressed() || entry.is_imploded() {
            return Err(Error::precondition(format!(
                "entry {} is not stored raw (encrypted={}, compressed={}, imploded={})",
                entry.index(),
                entry.is_encrypted(),
                entry.is_compressed(),
                entry.is_imploded(),
            )));
        }

        let parent = entry.archive();
        let depth  = parent.depth() + 1;
        if depth > parent.options.max_nesting_depth {
            return Err(Error::precondition(format!(
                "nesting depth {depth} exceeds limit {}",
                parent.options.max_nesting_depth
            )));
        }

        let mut chain = parent.ancestors.clone();
        chain.push(parent.offset);

        let (path, offset) = nested_location(&parent.path, parent.offset, entry.offset())?;
        if chain.contains(&offset) {
            return Err(Error::precondition(format!(
                "entry {} points back at an enclosing archive (offset {offset})",
                entry.index()
            )));
        }

        let mut nested = Self::open_with(
            parent.engine.clone(),
            path,
            ArchiveOffset::At(offset),
            parent.options,
        )?;
        if chain.contains(&nested.offset) {
            return Err(Error::precondition(format!(
                "nested header resolves to an enclosing archive (offset {})",
                nested.offset
            )));
        }
        nested.ancestors = chain;
        Ok(nested)
    }

    fn load_metadata(&mut self) -> Result<()> {
        let handle = self.handle()?;
        let engine = &self.engine;

        let packed_size   = engine.archive_packed_size(handle)?;
        let unpacked_size = engine.archive_unpacked_size(handle)?;
        let offset        = engine.archive_offset(handle)?;
        let version       = engine.archive_version(handle)?;
        let files         = engine.archive_files(handle)?;

        self.packed_size   = packed_size;
        self.unpacked_size = unpacked_size;
        self.offset        = offset;
        self.version       = version;
        self.files         = files;
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Release the engine handle.  Calling `close` again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            self.engine.close(handle)?;
            debug!(path = %self.path.display(), offset = self.offset, "closed archive");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<&E::Handle> {
        self.handle.as_ref().ok_or(Error::State(StateKind::Uninitialized))
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Look up an entry by name or index.
    ///
    /// A name that does not resolve fails with [`Error::NotFound`].  An
    /// index is only checked by the engine when the metadata is fetched.
    pub fn entry<'k, K: Into<EntryKey<'k>>>(&self, key: K) -> Result<Entry<'_, E>> {
        match key.into() {
            EntryKey::Name(name)   => self.entry_by_name(name),
            EntryKey::Index(index) => self.entry_by_index(index),
        }
    }

    pub fn entry_by_name(&self, name: &str) -> Result<Entry<'_, E>> {
        let index = self.engine.file_number(self.handle()?, name)?;
        Entry::new(self, index)
    }

    pub fn entry_by_index(&self, index: u32) -> Result<Entry<'_, E>> {
        Entry::new(self, index)
    }

    /// All entries in table order.
    pub fn entries(&self) -> impl Iterator<Item = Result<Entry<'_, E>>> + '_ {
        (0..self.files).map(move |index| Entry::new(self, index))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        match self.entry_by_name(name) {
            Ok(_)                 => Ok(true),
            Err(Error::NotFound)  => Ok(false),
            Err(e)                => Err(e),
        }
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }
    pub fn offset(&self) -> u64 { self.offset }
    pub fn packed_size(&self) -> u64 { self.packed_size }
    pub fn unpacked_size(&self) -> u64 { self.unpacked_size }
    pub fn version(&self) -> u32 { self.version }
    pub fn files(&self) -> u32 { self.files }
    pub fn options(&self) -> &OpenOptions { &self.options }

    /// Number of enclosing containers (0 for a root archive).
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    pub fn info(&self) -> ArchiveInfo {
        ArchiveInfo {
            path:          self.path.clone(),
            offset:        self.offset,
            packed_size:   self.packed_size,
            unpacked_size: self.unpacked_size,
            version:       self.version,
            files:         self.files,
            depth:         self.depth(),
        }
    }
}

impl<E: ArchiveEngine> Drop for Archive<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(code) = self.engine.close(handle) {
                warn!(path = %self.path.display(), %code, "failed to close archive");
            }
        }
    }
}

impl<E: ArchiveEngine> fmt::Debug for Archive<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("files", &self.files)
            .field("open", &self.is_open())
            .finish()
    }
}
