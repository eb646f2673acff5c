//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use yomu_api::error::{Error as ApiError, ErrorKind as ApiErrorKind};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// `Clone` because the last failure is also published in the observable
/// state.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The service could not be reached
    #[display("network error")]
    Network,
    /// The service refused the request, with its explanation
    #[display("server error: {_0}")]
    Server(#[error(not(source))] String),
    /// A response did not have the expected shape
    #[display("unexpected response from the service")]
    Decoding,
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

    /// Wrap a failed API call, keeping its error tree as a child frame.
    #[track_caller]
    pub fn api(err: ApiError) -> Error {
        let kind = Self::from_api(&err);
        err.raise(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_api() {
        let server = ApiErrorKind::Server { status: 503, detail: "Status code: 503".into() };
        assert_eq!(ErrorKind::from_api(&server), ErrorKind::Server("Status code: 503".into()));
        assert_eq!(ErrorKind::from_api(&ApiErrorKind::Network("reset".into())), ErrorKind::Network);
        assert!(ErrorKind::from_api(&ApiErrorKind::Network("reset".into())).is_retryable());
        assert_eq!(ErrorKind::from_api(&ApiErrorKind::InvalidUrl("x".into())), ErrorKind::Unknown);
    }
}
