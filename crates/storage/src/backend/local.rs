//! Local filesystem key-value store.
//!
//! Each key is one file directly inside the store's root directory, accessed
//! via `tokio::fs` for async I/O. Writes go to a temporary sibling first and
//! are renamed into place, so a crash never leaves a half-written value.

use crate::error::{ErrorKind, Result};
use crate::{KeyValueStore, key::validate as validate_key};
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const TEMP_SUFFIX: &str = ".tmp";

/// Local filesystem key-value store.
///
/// # Examples
///
/// ```no_run
/// use yomu_storage::backend::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let preferences = LocalStore::new("preferences", "/home/reader/.local/share/yomu/preferences")?;
/// let secrets = LocalStore::private("secrets", "/home/reader/.local/share/yomu/secrets")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStore {
    name: String,
    /// Directory holding one file per key
    root: PathBuf,
    /// Owner-only permissions for the directory and every file
    private: bool,
}
impl LocalStore {
    /// Create a new local store, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        Self::create(name.into(), root.as_ref(), false)
    }

    /// Like [`new()`](Self::new), but the directory is restricted to the
    /// owner (`0700`) and values are written as `0600` on Unix. Used for
    /// credentials.
    pub fn private(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        Self::create(name.into(), root.as_ref(), true)
    }

    fn create(name: String, root: &Path, private: bool) -> Result<Self> {
        let root = root.to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidRoot(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidRoot(root));
            }
        } else {
            // Use non-async here; it only happens once on start-up and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        #[cfg(unix)]
        if private {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| Self::map_io_error(e, &root))?;
        }
        tracing::debug!(store = %name, root = %root.display(), private, "Opened local store");
        Ok(Self { name, root, private })
    }

    fn file_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    fn map_key_error(e: std::io::Error, key: &str, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            _ => Self::map_io_error(e, path),
        }
    }

    async fn write_file(&self, path: &Path, value: &[u8]) -> std::io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if self.private {
            options.mode(0o600);
        }
        let mut file = options.open(path).await?;
        file.write_all(value).await?;
        file.sync_all().await
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.file_path(key)?;
        Ok(fs::read(&path).await.map_err(|e| Self::map_key_error(e, key, &path))?)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.file_path(key)?;
        let temp = self.root.join(format!(".{key}{TEMP_SUFFIX}"));
        if let Err(e) = self.write_file(&temp, value).await {
            let _ = fs::remove_file(&temp).await;
            exn::bail!(Self::map_io_error(e, &temp));
        }
        Ok(fs::rename(&temp, &path).await.map_err(|e| Self::map_io_error(e, &path))?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key)?;
        Ok(fs::remove_file(&path).await.map_err(|e| Self::map_key_error(e, key, &path))?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.file_path(key)?;
        Ok(fs::try_exists(&path).await.map_err(|e| Self::map_io_error(e, &path))?)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| Self::map_io_error(e, &self.root))?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &self.root))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Skips leftover temporary files along with anything else that
            // isn't a valid key.
            if validate_key(&name).is_ok() && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalStore::new("name", temp_dir.path()).is_ok());
        assert!(LocalStore::new("name", "relative/path").is_err());
        assert!(LocalStore::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/store");
        LocalStore::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_root_must_be_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = LocalStore::new("name", &file).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidRoot(_)));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("name", temp_dir.path()).unwrap();
        store.put("username", b"reader").await.unwrap();
        assert_eq!(store.get("username").await.unwrap(), b"reader");
        store.put("username", b"other").await.unwrap();
        assert_eq!(store.get("username").await.unwrap(), b"other");
        // No temporary file is left behind.
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("name", temp_dir.path()).unwrap();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(key) if key == "missing"));
        assert_eq!(store.try_get("missing").await.unwrap(), None);
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("name", temp_dir.path()).unwrap();
        store.put("token", b"abc").await.unwrap();
        store.delete("token").await.unwrap();
        assert!(!store.exists("token").await.unwrap());
        // Deleting a missing key is an error, removing it is not
        let err = store.delete("token").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        store.remove("token").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("name", temp_dir.path()).unwrap();
        store.put("b", b"2").await.unwrap();
        store.put("a", b"1").await.unwrap();
        std::fs::write(temp_dir.path().join(".c.tmp"), b"partial").unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_key_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("name", temp_dir.path()).unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.put("../escape", b"data").await.is_err());
        assert!(store.delete("a/b").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("secrets");
        let store = LocalStore::private("secrets", &root).unwrap();
        store.put("access_token", b"secret").await.unwrap();
        let dir_mode = std::fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        let file_mode = std::fs::metadata(root.join("access_token")).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
