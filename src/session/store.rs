//! Session persistence over the object store.
//!
//! Records live at `sessions/{id}.json`; the index is a single object at
//! `sessions/_index.json`. Upserts write the record first and the index
//! second, so a crash between the two leaves an orphan record rather than
//! a stale index pointer.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::storage::{
    decode_json, encode_json, keys, update_index, ObjectStore, Precondition, StorageError,
    StorageResult,
};

use super::models::{Session, SessionIndex, SessionIndexEntry};

/// One page of session index entries.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub entries: Vec<SessionIndexEntry>,
    pub total: usize,
}

/// Store for session records and the session index.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn ObjectStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Fetch a session, or `None` if the record is absent. Decode and
    /// validation failures surface as read errors.
    pub async fn get_session(&self, session_id: &str) -> StorageResult<Option<Session>> {
        let key = keys::session(session_id);
        let Some(obj) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let session: Session = decode_json(&key, &obj.bytes)?;
        session
            .validate()
            .map_err(|cause| StorageError::read(format!("{key}: {cause}")))?;
        Ok(Some(session))
    }

    /// Write a session record, then upsert its index entry.
    pub async fn put_session(&self, session: &Session) -> StorageResult<()> {
        let key = keys::session(&session.session_id);
        session
            .validate()
            .map_err(|cause| StorageError::write(format!("{key}: {cause}")))?;

        let bytes = encode_json(&key, session)?;
        self.store
            .put(&key, bytes, Precondition::None)
            .await?
            .ok_or_else(|| StorageError::write(format!("{key}: unconditional put rejected")))?;

        let entry = session.index_entry();
        let id = session.session_id.clone();
        update_index(
            self.store.as_ref(),
            keys::SESSION_INDEX,
            SessionIndex::empty,
            move |index: &mut SessionIndex| {
                index.sessions.insert(id.clone(), entry.clone());
                index.updated_at = Utc::now().timestamp_millis();
            },
        )
        .await
    }

    /// Delete a session record, then drop its index entry. Callers must
    /// cascade run deletion first; the store does not couple the two
    /// domains.
    pub async fn delete_session(&self, session_id: &str) -> StorageResult<()> {
        self.store.delete(&keys::session(session_id)).await?;
        debug!("deleted session record {session_id}");

        let id = session_id.to_string();
        update_index(
            self.store.as_ref(),
            keys::SESSION_INDEX,
            SessionIndex::empty,
            move |index: &mut SessionIndex| {
                index.sessions.remove(&id);
                index.updated_at = Utc::now().timestamp_millis();
            },
        )
        .await
    }

    /// List sessions from the index, newest activity first.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> StorageResult<SessionPage> {
        let index = self.read_index().await?;
        let mut entries: Vec<SessionIndexEntry> = index.sessions.into_values().collect();
        entries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        let total = entries.len();
        let entries = entries.into_iter().skip(offset).take(limit).collect();
        Ok(SessionPage { entries, total })
    }

    async fn read_index(&self) -> StorageResult<SessionIndex> {
        match self.store.get(keys::SESSION_INDEX).await? {
            Some(obj) => decode_json(keys::SESSION_INDEX, &obj.bytes),
            None => Ok(SessionIndex::empty()),
        }
    }
}
