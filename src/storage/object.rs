//! Object store trait definitions.

use async_trait::async_trait;

use super::StorageResult;

/// Opaque entity tag returned by writes and used for conditional updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Etag(String);

impl Etag {
    /// Sentinel tag for an object that does not exist yet. A conditional
    /// write against it succeeds only when the key is still absent.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Etag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object read back from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub etag: Etag,
}

/// Write precondition.
#[derive(Debug, Clone)]
pub enum Precondition {
    /// Unconditional write.
    None,
    /// Write succeeds only if the current etag matches. `Etag::none()`
    /// requires the key to be absent.
    IfMatch(Etag),
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
}

/// Object store contract: get/put/delete/list with conditional writes.
///
/// Implementations must treat each key as linearizable; the etag CAS on
/// `put` is the only concurrency primitive callers rely on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, or `None` if the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>>;

    /// Write an object. Returns the new etag, or `None` when the
    /// precondition failed (caller treats that as a CAS conflict).
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> StorageResult<Option<Etag>>;

    /// Delete an object. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys under a prefix.
    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> StorageResult<Listing>;
}

/// Decode an object's bytes as JSON, surfacing decode failures as read errors.
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> StorageResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| super::StorageError::read(format!("{key}: {e}")))
}

/// Encode a value as JSON for storage.
pub(crate) fn encode_json<T: serde::Serialize>(key: &str, value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| super::StorageError::write(format!("{key}: {e}")))
}
