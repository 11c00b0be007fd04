//! Error taxonomy shared by the core and the engine boundary.
//!
//! Engines report failures as [`ErrorCode`], a closed enumeration of the
//! status codes an MPQ engine can return.  The core converts every code into
//! an [`Error`] at the single point where engine results are checked.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by every [`ArchiveEngine`](crate::engine::ArchiveEngine) primitive.
pub type EngineResult<T> = std::result::Result<T, ErrorCode>;

// ── Engine status codes ──────────────────────────────────────────────────────

/// Status codes reported by an archive engine.
///
/// The numeric values are the ones used by C engines (`0` is success and is
/// never represented here).  Codes outside the known table are carried as
/// [`ErrorCode::Unknown`] so they are never mistaken for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Open,
    Close,
    Seek,
    Read,
    Write,
    Malloc,
    Format,
    NotInitialized,
    Size,
    Exist,
    Decrypt,
    Unpack,
    Unknown(i32),
}

impl ErrorCode {
    /// Map a raw engine return value.  Returns `None` for `0` and any
    /// non-negative value, which engines use for success / counts.
    pub fn from_raw(code: i32) -> Option<Self> {
        let mapped = match code {
            c if c >= 0 => return None,
            -1  => ErrorCode::Open,
            -2  => ErrorCode::Close,
            -3  => ErrorCode::Seek,
            -4  => ErrorCode::Read,
            -5  => ErrorCode::Write,
            -6  => ErrorCode::Malloc,
            -7  => ErrorCode::Format,
            -8  => ErrorCode::NotInitialized,
            -9  => ErrorCode::Size,
            -10 => ErrorCode::Exist,
            -11 => ErrorCode::Decrypt,
            -12 => ErrorCode::Unpack,
            c   => ErrorCode::Unknown(c),
        };
        Some(mapped)
    }

    /// Check a raw return value, passing non-negative values through.
    /// For engine adapters wrapping a C library that reports `int` codes.
    pub fn check(code: i32) -> EngineResult<u32> {
        match Self::from_raw(code) {
            None      => Ok(code as u32),
            Some(err) => Err(err),
        }
    }

    /// The raw numeric value of this code.
    pub fn raw(self) -> i32 {
        match self {
            ErrorCode::Open           => -1,
            ErrorCode::Close          => -2,
            ErrorCode::Seek           => -3,
            ErrorCode::Read           => -4,
            ErrorCode::Write          => -5,
            ErrorCode::Malloc         => -6,
            ErrorCode::Format         => -7,
            ErrorCode::NotInitialized => -8,
            ErrorCode::Size           => -9,
            ErrorCode::Exist          => -10,
            ErrorCode::Decrypt        => -11,
            ErrorCode::Unpack         => -12,
            ErrorCode::Unknown(c)     => c,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Error::from(*self))
    }
}

// ── Core error type ──────────────────────────────────────────────────────────

/// Storage operation that failed inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Close,
    Seek,
    Read,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoOp::Open  => "open",
            IoOp::Close => "close",
            IoOp::Seek  => "seek",
            IoOp::Read  => "read",
            IoOp::Write => "write",
        })
    }
}

/// Engine precondition or decode-step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Uninitialized,
    BufferTooSmall,
    Decrypt,
    Unpack,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateKind::Uninitialized  => "not initialized",
            StateKind::BufferTooSmall => "buffer size too small",
            StateKind::Decrypt        => "decrypt",
            StateKind::Unpack         => "unpack",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(IoOp),
    #[error("Out of memory")]
    Resource,
    #[error("File is not an mpq or is corrupted")]
    Format,
    #[error("Invalid state: {0}")]
    State(StateKind),
    #[error("File not in archive")]
    NotFound,
    #[error("Unrecognised engine error code {0}")]
    Engine(i32),
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Host I/O error: {0}")]
    HostIo(#[from] io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Open           => Error::Io(IoOp::Open),
            ErrorCode::Close          => Error::Io(IoOp::Close),
            ErrorCode::Seek           => Error::Io(IoOp::Seek),
            ErrorCode::Read           => Error::Io(IoOp::Read),
            ErrorCode::Write          => Error::Io(IoOp::Write),
            ErrorCode::Malloc         => Error::Resource,
            ErrorCode::Format         => Error::Format,
            ErrorCode::NotInitialized => Error::State(StateKind::Uninitialized),
            ErrorCode::Size           => Error::State(StateKind::BufferTooSmall),
            ErrorCode::Exist          => Error::NotFound,
            ErrorCode::Decrypt        => Error::State(StateKind::Decrypt),
            ErrorCode::Unpack         => Error::State(StateKind::Unpack),
            ErrorCode::Unknown(c)     => Error::Engine(c),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::HostIo(e)       => return io::Error::new(e.kind(), err),
            Error::NotFound        => io::ErrorKind::NotFound,
            Error::Resource        => io::ErrorKind::OutOfMemory,
            Error::Format
            | Error::State(_)      => io::ErrorKind::InvalidData,
            Error::Precondition(_) => io::ErrorKind::InvalidInput,
            Error::Io(_)
            | Error::Engine(_)     => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
