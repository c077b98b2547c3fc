//! Run data models.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on stored task text.
pub const MAX_TASK_LEN: usize = 10_000;

/// Generate a fresh run id: `run-` followed by 8 hex characters.
pub fn generate_run_id() -> String {
    format!("run-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run record written, workflow not yet executing the task.
    Started,
    /// Task execution in flight.
    Running,
    /// Terminal: the task finished successfully.
    Completed,
    /// Terminal: the task failed.
    Failed,
}

impl RunStatus {
    /// Terminal states are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Started => write!(f, "started"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(RunStatus::Started),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

/// Outcome attached to a terminal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One task execution against a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub session_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub task: String,
    pub title: String,
    pub model: String,
    /// UNIX milliseconds.
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
}

impl Run {
    pub fn validate(&self) -> Result<(), String> {
        if self.run_id.is_empty() {
            return Err("runId must not be empty".to_string());
        }
        if self.session_id.is_empty() {
            return Err("sessionId must not be empty".to_string());
        }
        if self.task.len() > MAX_TASK_LEN {
            return Err(format!(
                "task exceeds {MAX_TASK_LEN} characters ({})",
                self.task.len()
            ));
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            return Err(format!("terminal run {} missing completedAt", self.run_id));
        }
        Ok(())
    }

    /// Projection kept in the global run index.
    pub fn index_entry(&self) -> RunIndexEntry {
        RunIndexEntry {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            status: self.status,
            title: self.title.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Arguments to the terminal `complete_run` transition.
#[derive(Debug, Clone, Default)]
pub struct RunCompletion {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub title: Option<String>,
}

/// Lightweight run projection kept in the global index; enables
/// cross-session queries without a secondary lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIndexEntry {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub title: String,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

/// The single object holding projections of all runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIndex {
    pub version: u32,
    pub runs: BTreeMap<String, RunIndexEntry>,
    pub updated_at: i64,
}

impl RunIndex {
    pub fn empty() -> Self {
        Self {
            version: 1,
            runs: BTreeMap::new(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Filters for `list_runs`. All supplied filters apply conjunctively.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub session_id: Option<String>,
    pub status: Option<RunStatus>,
    /// Only runs with `started_at` strictly before this UNIX-ms instant.
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn matches(&self, entry: &RunIndexEntry) -> bool {
        if let Some(session_id) = &self.session_id {
            if entry.session_id != *session_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(before) = self.before {
            if entry.started_at >= before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_generated_run_ids() {
        for _ in 0..16 {
            let id = generate_run_id();
            let hex = id.strip_prefix("run-").unwrap();
            assert_eq!(hex.len(), 8);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_status_terminality() {
        assert!(!RunStatus::Started.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_validate_bounds_task() {
        let mut run = sample_run("run-0", "s", 1);
        run.task = "x".repeat(MAX_TASK_LEN + 1);
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_filter_conjunction() {
        let entry = sample_run("run-1", "sess-a", 200).index_entry();

        assert!(RunFilter::default().matches(&entry));
        assert!(RunFilter {
            session_id: Some("sess-a".to_string()),
            status: Some(RunStatus::Started),
            before: Some(201),
            ..Default::default()
        }
        .matches(&entry));
        assert!(!RunFilter {
            session_id: Some("sess-b".to_string()),
            ..Default::default()
        }
        .matches(&entry));
        assert!(!RunFilter {
            before: Some(200),
            ..Default::default()
        }
        .matches(&entry));
    }

    pub(crate) fn sample_run(run_id: &str, session_id: &str, started_at: i64) -> Run {
        Run {
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            workflow_id: run_id.to_string(),
            status: RunStatus::Started,
            task: "Add a README".to_string(),
            title: "Add README".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            started_at,
            completed_at: None,
            result: None,
        }
    }
}
