//! Errors surfaced by the filesystem core.

use std::error;
use std::fmt;
use std::io;

/// An error returned by a filesystem operation.
///
/// The set is closed: every operation of the core either succeeds or returns
/// one of these variants.
#[derive(Debug)]
pub enum Error {
    /// The path does not resolve to an existing file.
    NotFound,
    /// The name to be created already exists.
    Exists,
    /// The operation requires a directory but the path names a file.
    NotDirectory,
    /// The operation requires a regular file but the path names a directory.
    IsDirectory,
    /// The file name does not fit a directory entry.
    NameTooLong,
    /// The operation is not permitted.
    PermissionDenied,
    /// The log or the inode map is full.
    NoSpace,
    /// The write extends past the maximum file size.
    TooLarge,
    /// The image does not carry a valid filesystem.
    BadFormat,
    /// An error reported by the underlying device.
    Io(io::Error),
}

/// A result with the core's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(fmt, "no such file or directory"),
            Self::Exists => write!(fmt, "file exists"),
            Self::NotDirectory => write!(fmt, "not a directory"),
            Self::IsDirectory => write!(fmt, "is a directory"),
            Self::NameTooLong => write!(fmt, "file name too long"),
            Self::PermissionDenied => write!(fmt, "operation not permitted"),
            Self::NoSpace => write!(fmt, "no space left on device"),
            Self::TooLarge => write!(fmt, "file too large"),
            Self::BadFormat => write!(fmt, "invalid filesystem image"),
            Self::Io(err) => write!(fmt, "input/output error: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}
