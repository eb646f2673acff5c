//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No value stored under this key
    #[display("key not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied to the store's directory or one of its files
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Key contains characters that can't be stored safely
    #[display("invalid key: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    /// Store root is unusable (relative, or not a directory)
    #[display("invalid store root: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    /// Stored value could not be (de)serialized
    #[display("could not (de)serialize value for key: {_0}")]
    Serialization(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
