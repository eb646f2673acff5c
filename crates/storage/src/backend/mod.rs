//! Key-value store trait and implementations.
//!
//! This module defines the `KeyValueStore` trait, which provides a unified
//! interface over the places session secrets and preferences are kept (a
//! local directory, a private local directory, or memory in tests).

mod local;
#[cfg(any(test, feature = "mock"))]
mod memory;

pub use self::local::LocalStore;
#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;

/// Unified interface for key-value stores.
///
/// Values are opaque bytes; [`get_json()`](crate::get_json) and
/// [`put_json()`](crate::put_json) layer typed access on top.
///
/// # Key Handling
/// Keys must pass [`validate_key`](crate::validate_key). Implementations
/// enforce this on every call.
///
/// # Durability
/// A successful [`put()`](Self::put) or [`delete()`](Self::delete) has been
/// persisted by the time it returns.
///
/// # Examples
///
/// ```no_run
/// # use yomu_storage::{backend::KeyValueStore, error::Result};
/// async fn username(store: &dyn KeyValueStore) -> Result<Option<String>> {
///     let bytes = store.try_get("username").await?;
///     Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the store, used for logging only.
    fn name(&self) -> &str;

    /// Read a value.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing is
    /// stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Read a value, mapping [`NotFound`](crate::error::ErrorKind::NotFound)
    /// to `None`.
    async fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create or overwrite a value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing is
    /// stored under `key`; use [`remove()`](Self::remove) when that doesn't
    /// matter.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Idempotent [`delete()`](Self::delete).
    async fn remove(&self, key: &str) -> Result<()> {
        match self.delete(key).await {
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool>;

    /// All stored keys, sorted.
    async fn keys(&self) -> Result<Vec<String>>;
}
