//! Local filesystem object store.
//!
//! Keys map to paths under a root directory. Etags are content hashes, and
//! a store-level mutex serializes writes so conditional puts observe a
//! consistent current tag.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;

use super::object::{Etag, Listing, ObjectStore, Precondition, StoredObject};
use super::{StorageError, StorageResult};

/// Filesystem-backed object store rooted at a directory.
pub struct LocalStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.root.join(key))
    }

    fn content_etag(bytes: &[u8]) -> Etag {
        let digest = Sha256::digest(bytes);
        Etag::new(format!("{digest:x}"))
    }

    async fn read_current(&self, path: &Path) -> StorageResult<Option<(Vec<u8>, Etag)>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let etag = Self::content_etag(&bytes);
                Ok(Some((bytes, etag)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn collect_keys(
        root: &Path,
        dir: &Path,
        prefix: &str,
        out: &mut Vec<String>,
    ) -> std::io::Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_keys(root, &path, prefix, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                let key = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                if key.starts_with(prefix) {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let path = self.resolve(key)?;
        Ok(self
            .read_current(&path)
            .await?
            .map(|(bytes, etag)| StoredObject { bytes, etag }))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> StorageResult<Option<Etag>> {
        let path = self.resolve(key)?;
        let _guard = self.write_lock.lock().await;

        if let Precondition::IfMatch(expected) = &precondition {
            let current = self.read_current(&path).await?.map(|(_, etag)| etag);
            let matches = match (&current, expected.is_none()) {
                (None, true) => true,
                (Some(actual), false) => actual == expected,
                _ => false,
            };
            if !matches {
                return Ok(None);
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let etag = Self::content_etag(&bytes);
        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(Some(etag))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> StorageResult<Listing> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let mut keys = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            Self::collect_keys(&root, &root, &prefix, &mut out).map(|()| out)
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))??;

        keys.sort();
        let mut keys: Vec<String> = keys
            .into_iter()
            .filter(|k| cursor.as_deref().is_none_or(|c| k.as_str() > c))
            .take(limit + 1)
            .collect();

        let cursor = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        Ok(Listing { keys, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_cas() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let etag = store
            .put("sessions/a.json", b"{\"v\":1}".to_vec(), Precondition::None)
            .await
            .unwrap()
            .unwrap();
        let obj = store.get("sessions/a.json").await.unwrap().unwrap();
        assert_eq!(obj.etag, etag);

        let stale = store
            .put(
                "sessions/a.json",
                b"{\"v\":2}".to_vec(),
                Precondition::IfMatch(Etag::new("bogus")),
            )
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.get("../outside").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_list_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("sessions/a.json", vec![], Precondition::None)
            .await
            .unwrap();
        store
            .put("sessions/a/backup.tar.gz", vec![], Precondition::None)
            .await
            .unwrap();
        store
            .put("runs/r.json", vec![], Precondition::None)
            .await
            .unwrap();

        let listing = store.list("sessions/", 10, None).await.unwrap();
        assert_eq!(listing.keys.len(), 2);
        assert!(listing.keys.iter().all(|k| k.starts_with("sessions/")));
    }
}
