//! Object-store abstraction layer.
//!
//! Provides a trait-based object store with conditional writes (ETag
//! compare-and-swap) and implementations for:
//! - In-memory storage (tests, development)
//! - Local filesystem storage (single-node deployments)

mod error;
mod index;
pub mod keys;
mod local;
mod memory;
mod object;

pub use error::{StorageError, StorageResult};
pub use index::{update_index, INDEX_RETRY_ATTEMPTS, INDEX_RETRY_BASE_MS};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use object::{Etag, Listing, ObjectStore, Precondition, StoredObject};
pub(crate) use object::{decode_json, encode_json};

use std::path::PathBuf;
use std::sync::Arc;

/// Storage backend selection.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Volatile in-memory store.
    Memory,
    /// Filesystem-backed store rooted at the given directory.
    Local(PathBuf),
}

/// Create an object store based on configuration.
pub fn create_store(backend: StorageBackend) -> Arc<dyn ObjectStore> {
    match backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Local(root) => Arc::new(LocalStore::new(root)),
    }
}
