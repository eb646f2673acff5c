//! In-memory key-value store for testing.

use crate::KeyValueStore;
use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// In-memory key-value store for testing.
///
/// Values are stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation.
///
/// # Examples
///
/// ```ignore
/// use yomu_storage::backend::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::with_entries([("username", "reader")]);
/// assert!(store.exists("username").await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    name: String,
    storage: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a memory store pre-populated with values.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if validate_key(&key).is_err() {
                panic!("MemoryStore::with_entries: invalid key {key:?}");
            }
            map.insert(key, value.into());
        }
        Self { name: "memory".to_string(), storage: RwLock::new(map) }
    }

    /// Change the name of the memory store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Snapshot of the stored value, for assertions.
    pub async fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.storage.read().await.get(key).cloned()
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        let entries: [(&str, &str); 0] = [];
        Self::with_entries(entries)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let key = validate_key(key)?;
        self.storage.read().await.get(key).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = validate_key(key)?;
        self.storage.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        match self.storage.write().await.remove(key) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        Ok(self.storage.read().await.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.storage.read().await.keys().cloned().collect())
    }
}
