//! Key validation.
//!
//! Keys become file names in [`LocalStore`](crate::backend::LocalStore), so
//! they are restricted to a conservative character set and can never name
//! anything outside the store's root.

use crate::error::{ErrorKind, Result};

/// Validates a storage key.
///
/// Allowed: ASCII letters, digits, `_`, `-` and `.`, not starting with a dot
/// (which also rules out `.` and `..` and hides nothing from listings).
///
/// # Examples
///
/// ```
/// use yomu_storage::validate_key;
/// assert!(validate_key("access_token").is_ok());
/// assert!(validate_key("reading-progress.v2").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/b").is_err());
/// assert!(validate_key("").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    match valid {
        true => Ok(key),
        false => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert_eq!(validate("access_token").unwrap(), "access_token");
        assert_eq!(validate("followed_ids").unwrap(), "followed_ids");
        assert_eq!(validate("v1.progress-backup").unwrap(), "v1.progress-backup");
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate("..").is_err());
        assert!(validate("../secrets").is_err());
        assert!(validate("a/../../b").is_err());
        assert!(validate("/etc/passwd").is_err());
        assert!(validate("a\\b").is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate("a\0b").is_err());
        assert!(validate("with space").is_err());
        assert!(validate("ünïcode").is_err());
        assert!(validate(".hidden").is_err());
    }

    #[test]
    fn test_empty_and_oversized() {
        assert!(validate("").is_err());
        assert!(validate(&"k".repeat(129)).is_err());
        assert!(validate(&"k".repeat(128)).is_ok());
    }
}
