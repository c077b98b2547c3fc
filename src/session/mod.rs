//! Session domain: records, index projection, and the session store.

mod models;
mod store;

pub use models::{
    generate_session_id, validate_session_id, Repository, Session, SessionConfig, SessionIndex,
    SessionIndexEntry, SessionStatus, MAX_SESSION_ID_LEN,
};
pub use store::{SessionPage, SessionStore};

#[cfg(test)]
pub(crate) use models::tests::sample_session;
