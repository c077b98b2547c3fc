//! In-memory object store.
//!
//! Linearizable per key; used by tests and in-process development mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::object::{Etag, Listing, ObjectStore, Precondition, StoredObject};
use super::StorageResult;

/// Volatile object store backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, Etag)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_etag() -> Etag {
        Etag::new(Uuid::new_v4().simple().to_string())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|(bytes, etag)| StoredObject {
            bytes: bytes.clone(),
            etag: etag.clone(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> StorageResult<Option<Etag>> {
        let mut objects = self.objects.write().await;
        let current = objects.get(key).map(|(_, etag)| etag.clone());

        match precondition {
            Precondition::None => {}
            Precondition::IfMatch(expected) => {
                let matches = match (&current, expected.is_none()) {
                    (None, true) => true,
                    (Some(actual), false) => *actual == expected,
                    _ => false,
                };
                if !matches {
                    return Ok(None);
                }
            }
        }

        let etag = Self::fresh_etag();
        objects.insert(key.to_string(), (bytes, etag.clone()));
        Ok(Some(etag))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> StorageResult<Listing> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| cursor.as_deref().is_none_or(|c| k.as_str() > c))
            .take(limit + 1)
            .cloned()
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
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        let etag = store
            .put("a/b.json", b"{}".to_vec(), Precondition::None)
            .await
            .unwrap()
            .unwrap();

        let obj = store.get("a/b.json").await.unwrap().unwrap();
        assert_eq!(obj.bytes, b"{}");
        assert_eq!(obj.etag, etag);
    }

    #[tokio::test]
    async fn test_if_match_rejects_stale_etag() {
        let store = MemoryStore::new();
        let first = store
            .put("k", b"1".to_vec(), Precondition::None)
            .await
            .unwrap()
            .unwrap();
        store
            .put("k", b"2".to_vec(), Precondition::IfMatch(first.clone()))
            .await
            .unwrap()
            .unwrap();

        // The original etag is now stale.
        let conflict = store
            .put("k", b"3".to_vec(), Precondition::IfMatch(first))
            .await
            .unwrap();
        assert!(conflict.is_none());
    }

    #[tokio::test]
    async fn test_if_match_none_requires_absence() {
        let store = MemoryStore::new();
        let created = store
            .put("k", b"1".to_vec(), Precondition::IfMatch(Etag::none()))
            .await
            .unwrap();
        assert!(created.is_some());

        let conflict = store
            .put("k", b"2".to_vec(), Precondition::IfMatch(Etag::none()))
            .await
            .unwrap();
        assert!(conflict.is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemoryStore::new();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_prefix_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .put(&format!("p/{i}"), vec![], Precondition::None)
                .await
                .unwrap();
        }
        store.put("q/0", vec![], Precondition::None).await.unwrap();

        let page = store.list("p/", 3, None).await.unwrap();
        assert_eq!(page.keys, vec!["p/0", "p/1", "p/2"]);
        let cursor = page.cursor.expect("more pages");

        let rest = store.list("p/", 3, Some(cursor)).await.unwrap();
        assert_eq!(rest.keys, vec!["p/3", "p/4"]);
        assert!(rest.cursor.is_none());
    }
}
