//! Uniform key→bytes storage.
//!
//! The vault, the schedule store, and optional conversation persistence all
//! sit on this narrow interface. Two implementations ship: an in-memory map
//! for tests and ephemeral runs, and a filesystem-rooted store. A remote
//! object store speaks the same interface from the hosting side.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

/// Narrow storage interface: `put`, `get`, `delete`, `list`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores bytes under a key, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieves the bytes under a key, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists keys, optionally restricted to a prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;
}

/// In-memory map store.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Filesystem store rooted at a directory.
///
/// Keys map to relative paths under the root; `/` separates directories.
/// Keys that escape the root (absolute, or containing `..`) are rejected.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Creates the root directory if absent.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative.is_absolute() {
            return Err(Error::storage(format!("absolute key not allowed: {}", key)));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(Error::storage(format!("key escapes root: {}", key)));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative.to_string_lossy().replace('\\', "/");
                    if prefix.is_none_or(|p| key.starts_with(p)) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.get("vault/MISSING.json").await.unwrap(), None);

        storage.put("vault/A.json", b"alpha").await.unwrap();
        storage.put("vault/B.json", b"beta").await.unwrap();
        storage.put("schedules/1.json", b"sched").await.unwrap();

        assert_eq!(
            storage.get("vault/A.json").await.unwrap(),
            Some(b"alpha".to_vec())
        );

        let vault_keys = storage.list(Some("vault/")).await.unwrap();
        assert_eq!(vault_keys, vec!["vault/A.json", "vault/B.json"]);

        let all = storage.list(None).await.unwrap();
        assert_eq!(all.len(), 3);

        storage.delete("vault/A.json").await.unwrap();
        assert_eq!(storage.get("vault/A.json").await.unwrap(), None);
        // Deleting again is a no-op.
        storage.delete("vault/A.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        exercise(&storage).await;
    }

    #[tokio::test]
    async fn test_file_storage() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path().join("data")).unwrap();
        exercise(&storage).await;
    }

    #[tokio::test]
    async fn test_file_storage_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path().join("data")).unwrap();
        assert!(storage.get("../outside").await.is_err());
        assert!(storage.put("/etc/passwd", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let storage = MemoryStorage::new();
        storage.put("k", b"one").await.unwrap();
        storage.put("k", b"two").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(b"two".to_vec()));
    }
}
