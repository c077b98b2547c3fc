//! Session data models.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted session id length.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Validate a session id: lowercase alphanumeric segments separated by
/// single hyphens, no leading/trailing hyphen, at most 64 characters.
pub fn validate_session_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
        return false;
    }
    if id.starts_with('-') || id.ends_with('-') || id.contains("--") {
        return false;
    }
    id.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Generate a fresh session id: the first 8 hex characters of a UUID v4.
/// UUID hex is lowercase, so generated ids always pass `validate_session_id`.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session record exists but the sandbox is not ready yet.
    Creating,
    /// Session has an active or recently active sandbox.
    Active,
    /// No recent activity.
    Idle,
    /// Sandbox stopped.
    Stopped,
    /// Session failed.
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Creating => write!(f, "creating"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "creating" => Ok(SessionStatus::Creating),
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "stopped" => Ok(SessionStatus::Stopped),
            "error" => Ok(SessionStatus::Error),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// Repository attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Must start with `https://github.com/`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub default_model: String,
}

/// A logical user workspace: one sandbox identity, optional repository,
/// accumulated agent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// Equal to `session_id` in this design.
    pub sandbox_id: String,
    /// UNIX milliseconds.
    pub created_at: i64,
    /// UNIX milliseconds, bumped on every activity.
    pub last_activity: i64,
    pub status: SessionStatus,
    pub workspace_path: String,
    pub web_ui_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub config: SessionConfig,
    /// Session identifier tracked by the agent subprocess, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opencode_session_id: Option<String>,
    /// Ordered, duplicate-free list of repo URLs ever cloned into this
    /// sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_repos: Option<Vec<String>>,
}

impl Session {
    /// Schema validation applied before every encode and after every decode.
    pub fn validate(&self) -> Result<(), String> {
        if !validate_session_id(&self.session_id) {
            return Err(format!("invalid session id: {:?}", self.session_id));
        }
        if self.sandbox_id.is_empty() {
            return Err("sandboxId must not be empty".to_string());
        }
        if self.workspace_path.is_empty() {
            return Err("workspacePath must not be empty".to_string());
        }
        if let Some(repo) = &self.repository {
            if !repo.url.starts_with("https://github.com/") {
                return Err(format!(
                    "repository url must start with https://github.com/: {}",
                    repo.url
                ));
            }
        }
        if let Some(repos) = &self.cloned_repos {
            let mut seen = std::collections::BTreeSet::new();
            for url in repos {
                if !seen.insert(url) {
                    return Err(format!("clonedRepos contains duplicate: {url}"));
                }
            }
        }
        Ok(())
    }

    /// Record that a repo URL was cloned into this sandbox. Repeat clones
    /// are no-ops.
    pub fn record_cloned_repo(&mut self, url: &str) {
        let repos = self.cloned_repos.get_or_insert_with(Vec::new);
        if !repos.iter().any(|r| r == url) {
            repos.push(url.to_string());
        }
    }

    /// Lightweight projection for the session index.
    pub fn index_entry(&self) -> SessionIndexEntry {
        SessionIndexEntry {
            session_id: self.session_id.clone(),
            status: self.status,
            created_at: self.created_at,
            last_activity: self.last_activity,
            title: self.title.clone(),
        }
    }
}

/// Lightweight session projection kept in the index object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: i64,
    pub last_activity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The single object holding projections of all sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndex {
    pub version: u32,
    pub sessions: BTreeMap<String, SessionIndexEntry>,
    pub updated_at: i64,
}

impl SessionIndex {
    pub fn empty() -> Self {
        Self {
            version: 1,
            sessions: BTreeMap::new(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("abc123"));
        assert!(validate_session_id("my-session-1"));
        assert!(validate_session_id("a"));
        assert!(!validate_session_id(""));
        assert!(!validate_session_id("Upper"));
        assert!(!validate_session_id("-leading"));
        assert!(!validate_session_id("trailing-"));
        assert!(!validate_session_id("double--hyphen"));
        assert!(!validate_session_id("under_score"));
        assert!(!validate_session_id(&"a".repeat(65)));
        assert!(validate_session_id(&"a".repeat(64)));
    }

    #[test]
    fn test_generated_ids_are_valid_hex8() {
        for _ in 0..32 {
            let id = generate_session_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(validate_session_id(&id));
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SessionStatus::Creating,
            SessionStatus::Active,
            SessionStatus::Idle,
            SessionStatus::Stopped,
            SessionStatus::Error,
        ] {
            let parsed: SessionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_record_cloned_repo_is_set() {
        let mut session = sample_session();
        session.record_cloned_repo("https://github.com/u/r");
        session.record_cloned_repo("https://github.com/u/r");
        session.record_cloned_repo("https://github.com/u/other");
        assert_eq!(
            session.cloned_repos.as_deref(),
            Some(
                &[
                    "https://github.com/u/r".to_string(),
                    "https://github.com/u/other".to_string()
                ][..]
            )
        );
    }

    #[test]
    fn test_validate_rejects_non_github_repository() {
        let mut session = sample_session();
        session.repository = Some(Repository {
            url: "https://gitlab.com/u/r".to_string(),
            branch: None,
        });
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let session = sample_session();
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("lastActivity").is_some());
        assert!(json.get("webUiUrl").is_some());
        assert_eq!(json["config"]["defaultModel"], "claude-sonnet-4-5");
    }

    pub(crate) fn sample_session() -> Session {
        Session {
            session_id: "ab12cd34".to_string(),
            sandbox_id: "ab12cd34".to_string(),
            created_at: 1,
            last_activity: 1,
            status: SessionStatus::Active,
            workspace_path: "/workspace".to_string(),
            web_ui_url: "http://localhost:8787/session/ab12cd34/".to_string(),
            repository: None,
            title: None,
            config: SessionConfig {
                default_model: "claude-sonnet-4-5".to_string(),
            },
            opencode_session_id: None,
            cloned_repos: None,
        }
    }
}
