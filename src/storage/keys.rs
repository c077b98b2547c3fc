//! Canonical object-store key layout.
//!
//! All values are UTF-8 JSON except agent-state backups, which are binary
//! gzip tarballs.

/// Single object holding the projection of all sessions.
pub const SESSION_INDEX: &str = "sessions/_index.json";

/// Single object holding the global projection of all runs.
pub const RUN_INDEX: &str = "runs/_index.json";

/// Full session record.
pub fn session(session_id: &str) -> String {
    format!("sessions/{session_id}.json")
}

/// Full run record.
pub fn run(run_id: &str) -> String {
    format!("runs/{run_id}.json")
}

/// Agent-state backup blob for a session.
pub fn agent_backup(session_id: &str) -> String {
    format!("sessions/{session_id}/opencode-storage.tar.gz")
}
