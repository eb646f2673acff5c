//! Session Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use yomu_api::error::ErrorKind as ApiErrorKind;

/// A session error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// `Clone` so a single refresh outcome can be handed to every caller that
/// waited on it.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The token endpoint rejected the username or password
    #[display("invalid username or password")]
    InvalidCredentials,
    /// The service could not be reached
    #[display("network error")]
    Network,
    /// The service refused the request, with its explanation
    #[display("server error: {_0}")]
    Server(#[error(not(source))] String),
    /// Authentication is required but no usable token exists; log in again
    #[display("session expired; please log in again")]
    TokenExpired,
    /// The refresh grant failed; existing credentials were left in place
    #[display("could not refresh the session")]
    RefreshFailed,
    /// A response did not have the expected shape
    #[display("unexpected response from the service")]
    Decoding,
    /// Credentials could not be read from or written to local storage
    #[display("could not access stored credentials")]
    Storage,
    #[display("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Classify a failed API call.
    pub fn from_api(kind: &ApiErrorKind) -> Self {
        match kind {
            ApiErrorKind::Network(_) => Self::Network,
            ApiErrorKind::Server { detail, .. } => Self::Server(detail.clone()),
            ApiErrorKind::Decoding(_) => Self::Decoding,
            _ => Self::Unknown,
        }
    }
}
