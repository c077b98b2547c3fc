//! Conditional-write index update protocol.
//!
//! Both the session index and the global run index are single objects
//! updated by many writers. Updates go through an optimistic
//! read-patch-conditional-put loop; a conflicting writer retries on the
//! fresh etag with exponential backoff.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::object::{decode_json, encode_json, Etag, ObjectStore, Precondition};
use super::{StorageError, StorageResult};

/// Additional attempts after the first conflicting put.
pub const INDEX_RETRY_ATTEMPTS: u32 = 3;

/// Backoff base; doubles per retry.
pub const INDEX_RETRY_BASE_MS: u64 = 10;

/// Apply `patch` to the index object at `key` under etag CAS.
///
/// An absent index is synthesized via `empty` and written with an
/// absence precondition so two initializing writers cannot clobber each
/// other. After the retry budget is exhausted the write error names the
/// index object.
pub async fn update_index<D, E, F>(
    store: &dyn ObjectStore,
    key: &str,
    empty: E,
    patch: F,
) -> StorageResult<()>
where
    D: Serialize + DeserializeOwned,
    E: Fn() -> D,
    F: Fn(&mut D),
{
    let mut attempt: u32 = 0;
    loop {
        let (mut index, etag) = match store.get(key).await? {
            Some(obj) => (decode_json::<D>(key, &obj.bytes)?, obj.etag),
            None => (empty(), Etag::none()),
        };

        patch(&mut index);

        let bytes = encode_json(key, &index)?;
        match store.put(key, bytes, Precondition::IfMatch(etag)).await? {
            Some(_) => return Ok(()),
            None => {
                if attempt >= INDEX_RETRY_ATTEMPTS {
                    return Err(StorageError::write(format!(
                        "{key}: conditional update conflicted after {} attempts",
                        attempt + 1
                    )));
                }
                let backoff = INDEX_RETRY_BASE_MS << attempt;
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
        }
    }
}
