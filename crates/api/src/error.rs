//! API Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use serde::Deserialize;

/// An API error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The service answered with a non-success status.
    #[display("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    /// The response payload did not match the expected shape.
    #[display("could not decode {_0} response")]
    Decoding(#[error(not(source))] String),
    /// A URL could not be constructed from the configured endpoints.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// A value could not be parsed into one of the closed enums.
    #[display("could not parse {field}: {value}")]
    Parse { field: &'static str, value: String },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status of a [`Server`](Self::Server) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build a [`Server`](Self::Server) error from a failed response body.
    ///
    /// The detail is taken from an OAuth `error_description`, else the first
    /// entry of the service's `errors` array, else the bare status code.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|body| {
                body.error_description
                    .or_else(|| body.errors.into_iter().find_map(|err| err.detail.or(err.title)))
            })
            .filter(|detail| !detail.is_empty())
            .unwrap_or_else(|| format!("Status code: {status}"));
        Self::Server { status, detail }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    title: Option<String>,
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(br#"{"error":"invalid_grant","error_description":"Account is disabled"}"#.as_slice(), "Account is disabled")]
    #[case(
        br#"{"result":"error","errors":[{"id":"x","status":400,"title":"Bad Request","detail":"Invalid status"}]}"#.as_slice(),
        "Invalid status"
    )]
    #[case(br#"{"result":"error","errors":[{"id":"x","status":403,"title":"Forbidden"}]}"#.as_slice(), "Forbidden")]
    #[case(b"<html>bad gateway</html>".as_slice(), "Status code: 502")]
    #[case(b"".as_slice(), "Status code: 502")]
    fn test_detail_extraction(#[case] body: &[u8], #[case] expected: &str) {
        let ErrorKind::Server { status, detail } = ErrorKind::from_response(502, body) else {
            panic!("expected a server error");
        };
        assert_eq!(status, 502);
        assert_eq!(detail, expected);
    }

    #[rstest]
    #[case(ErrorKind::Network("reset".into()), true)]
    #[case(ErrorKind::Server { status: 503, detail: String::new() }, true)]
    #[case(ErrorKind::Server { status: 404, detail: String::new() }, false)]
    #[case(ErrorKind::Decoding("entry".into()), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
