//! Key-value persistence for session credentials, preferences and reading
//! state.

pub mod backend;
pub mod error;
mod key;

pub use crate::backend::KeyValueStore;
use crate::error::{ErrorKind, Result};
pub use crate::key::validate as validate_key;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn KeyValueStore + Send + Sync>;

/// Read and decode a JSON value; `None` when the key is absent.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.try_get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Serialization(key.to_string()))?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
    store.put(key, &bytes).await
}

/// Read a UTF-8 string value; `None` when the key is absent.
pub async fn get_string(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>> {
    match store.try_get(key).await? {
        Some(bytes) => Ok(Some(String::from_utf8(bytes).or_raise(|| ErrorKind::Serialization(key.to_string()))?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Progress {
        page: u32,
        total: u32,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::default();
        assert_eq!(get_json::<Progress>(&store, "progress").await.unwrap(), None);

        let mut map = BTreeMap::new();
        map.insert("ch1".to_string(), Progress { page: 3, total: 10 });
        put_json(&store, "progress", &map).await.unwrap();
        let loaded: BTreeMap<String, Progress> = get_json(&store, "progress").await.unwrap().unwrap();
        assert_eq!(loaded, map);
    }

    #[tokio::test]
    async fn test_corrupt_json() {
        let store = MemoryStore::with_entries([("progress", "{not json")]);
        let err = get_json::<Progress>(&store, "progress").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Serialization(_)));
    }

    #[tokio::test]
    async fn test_get_string() {
        let store = MemoryStore::with_entries([("username", "reader")]);
        assert_eq!(get_string(&store, "username").await.unwrap().as_deref(), Some("reader"));
        assert_eq!(get_string(&store, "missing").await.unwrap(), None);
    }
}
