//! One logical file inside an [`Archive`].

use std::fmt;

use serde::Serialize;

use crate::archive::Archive;
use crate::engine::ArchiveEngine;
use crate::error::{Error, Result};
use crate::reader::Reader;

/// Serializable copy of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub index:         u32,
    pub name:          Option<String>,
    pub packed_size:   u64,
    pub unpacked_size: u64,
    pub offset:        u64,
    pub blocks:        u32,
    pub encrypted:     bool,
    pub compressed:    bool,
    pub imploded:      bool,
}

/// A view over entry `index` of a borrowed [`Archive`].
///
/// All metadata is fetched from the engine when the view is created and never
/// refreshed.  The borrow ties the entry (and any [`Reader`] made from it) to
/// the archive, so the archive cannot be closed while either is alive.
pub struct Entry<'a, E: ArchiveEngine> {
    archive:       &'a Archive<E>,
    index:         u32,
    packed_size:   u64,
    unpacked_size: u64,
    offset:        u64,
    blocks:        u32,
    encrypted:     bool,
    compressed:    bool,
    imploded:      bool,
}

impl<'a, E: ArchiveEngine> Entry<'a, E> {
    pub(crate) fn new(archive: &'a Archive<E>, index: u32) -> Result<Self> {
        let handle = archive.handle()?;
        let engine = archive.engine();
        Ok(Self {
            archive,
            index,
            packed_size:   engine.file_packed_size(handle, index)?,
            unpacked_size: engine.file_unpacked_size(handle, index)?,
            offset:        engine.file_offset(handle, index)?,
            blocks:        engine.file_blocks(handle, index)?,
            encrypted:     engine.file_encrypted(handle, index)?,
            compressed:    engine.file_compressed(handle, index)?,
            imploded:      engine.file_imploded(handle, index)?,
        })
    }

    // ── Content ──────────────────────────────────────────────────────────────

    /// Decode the whole entry with a single engine call.
    ///
    /// Allocates `unpacked_size` bytes up front; prefer [`Entry::reader`]
    /// for large entries.
    pub fn read(&self) -> Result<Vec<u8>> {
        let size = usize::try_from(self.unpacked_size).map_err(|_| Error::Resource)?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| Error::Resource)?;
        data.resize(size, 0);

        let written = self.archive.engine().file_read(self.archive.handle()?, self.index, &mut data)?;
        data.truncate(written as usize);
        Ok(data)
    }

    /// Open a streaming reader positioned at the start of the entry.
    pub fn reader(&self) -> Result<Reader<'a, E>> {
        Reader::new(*self)
    }

    /// Open the archive stored in this entry.  See [`Archive::open_nested`].
    pub fn open_archive(&self) -> Result<Archive<E>>
    where
        E: Clone,
    {
        Archive::open_nested(self)
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn archive(&self) -> &'a Archive<E> { self.archive }
    pub fn index(&self) -> u32 { self.index }
    pub fn packed_size(&self) -> u64 { self.packed_size }
    pub fn unpacked_size(&self) -> u64 { self.unpacked_size }
    /// Byte offset of the entry data relative to the start of its archive.
    pub fn offset(&self) -> u64 { self.offset }
    pub fn blocks(&self) -> u32 { self.blocks }
    pub fn is_encrypted(&self) -> bool { self.encrypted }
    pub fn is_compressed(&self) -> bool { self.compressed }
    pub fn is_imploded(&self) -> bool { self.imploded }

    /// Name of the entry, when the engine knows it.
    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.archive.engine().file_name(self.archive.handle()?, self.index)?)
    }

    pub fn info(&self) -> Result<EntryInfo> {
        Ok(EntryInfo {
            index:         self.index,
            name:          self.name()?,
            packed_size:   self.packed_size,
            unpacked_size: self.unpacked_size,
            offset:        self.offset,
            blocks:        self.blocks,
            encrypted:     self.encrypted,
            compressed:    self.compressed,
            imploded:      self.imploded,
        })
    }
}

impl<E: ArchiveEngine> Clone for Entry<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: ArchiveEngine> Copy for Entry<'_, E> {}

impl<E: ArchiveEngine> fmt::Debug for Entry<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("archive", &self.archive.path())
            .field("index", &self.index)
            .field("unpacked_size", &self.unpacked_size)
            .field("blocks", &self.blocks)
            .finish()
    }
}
