//! Streaming read access to MPQ archives.
//!
//! An [`Archive`] owns one engine handle and caches the container metadata.
//! [`Entry`] is a borrowed view over one logical file; [`Reader`] turns the
//! entry's block sequence into a seekable byte stream.  Everything that
//! touches the on-disk format sits behind [`ArchiveEngine`]; the bundled
//! [`NativeEngine`] reads MPQ format versions 1 and 2.

pub mod archive;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod native;
pub mod reader;

pub use archive::{nested_location, Archive, ArchiveInfo, EntryKey};
pub use config::OpenOptions;
pub use engine::{ArchiveEngine, ArchiveOffset, EngineOptions};
pub use entry::{Entry, EntryInfo};
pub use error::{Error, ErrorCode, Result};
pub use native::NativeEngine;
pub use reader::{Lines, Reader};
