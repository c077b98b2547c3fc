//! Tool implementations and dispatch.

use std::sync::Arc;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::proxy::rewrite_local_host;
use crate::run::{generate_run_id, RunFilter, RunStatus};
use crate::session::{
    generate_session_id, validate_session_id, Repository, Session, SessionConfig, SessionStatus,
    SessionStore,
};
use crate::telemetry::{PhaseTimer, Telemetry, ToolCallEvent};
use crate::token::{CreateToken, TokenService};
use crate::workflow::{TaskParams, WorkflowEngine};

use super::error::{ToolError, ToolResult};

/// Default page size for `list_runs`.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Maximum accepted task length.
const MAX_TASK_LEN: usize = crate::run::MAX_TASK_LEN;

/// `run_task` input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunTaskInput {
    pub task: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Must start with `https://github.com/`.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// `run_task` output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskOutput {
    pub run_id: String,
    pub session_id: String,
    pub status: &'static str,
    pub web_ui_url: String,
}

/// `get_result` input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetResultInput {
    pub run_id: String,
}

/// `list_runs` input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListRunsInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub before: Option<i64>,
}

/// Validates tool calls, resolves or creates sessions, launches workflows,
/// and reports results.
pub struct ToolDispatcher {
    sessions: SessionStore,
    runs: crate::run::RunStore,
    tokens: TokenService,
    engine: Arc<dyn WorkflowEngine>,
    telemetry: Telemetry,
    base_url: String,
    default_model: String,
}

impl ToolDispatcher {
    pub fn new(
        sessions: SessionStore,
        runs: crate::run::RunStore,
        tokens: TokenService,
        engine: Arc<dyn WorkflowEngine>,
        telemetry: Telemetry,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            runs,
            tokens,
            engine,
            telemetry,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        }
    }

    /// Tool names exposed over the RPC surface.
    pub fn tool_names() -> [&'static str; 3] {
        ["run_task", "get_result", "list_runs"]
    }

    /// Dispatch a named tool call, emitting one wide event.
    pub async fn dispatch(&self, tool: &str, arguments: Value) -> ToolResult<Value> {
        let request_id = Uuid::new_v4().simple().to_string();
        let mut timer = PhaseTimer::start();

        let result = match tool {
            "run_task" => {
                let input = parse_input::<RunTaskInput>(arguments)?;
                self.run_task(input, &mut timer)
                    .await
                    .and_then(|out| to_value(&out))
            }
            "get_result" => {
                let input = parse_input::<GetResultInput>(arguments)?;
                self.get_result(input, &mut timer).await
            }
            "list_runs" => {
                let input = parse_input::<ListRunsInput>(arguments)?;
                self.list_runs(input, &mut timer).await
            }
            other => Err(ToolError::Validation(format!("unknown tool: {other}"))),
        };

        let mut event = ToolCallEvent::new(tool, request_id);
        event.duration_ms = timer.total_ms();
        event.phases = Some(timer.into_phases());
        if let Err(err) = &result {
            event.outcome = "error";
            event.error = Some(format!("{}: {err}", err.code()));
        }
        self.telemetry.emit_tool_call(event);

        result
    }

    /// Resolve or create the session, mint a proxy token, submit the
    /// workflow, and answer with the run handle.
    pub async fn run_task(
        &self,
        input: RunTaskInput,
        timer: &mut PhaseTimer,
    ) -> ToolResult<RunTaskOutput> {
        validate_run_task(&input)?;
        timer.mark("validate");

        let mut session = match &input.session_id {
            Some(id) => self
                .sessions
                .get_session(id)
                .await?
                .ok_or_else(|| ToolError::SessionNotFound(id.clone()))?,
            None => {
                let session = self.new_session(&input);
                self.sessions.put_session(&session).await?;
                info!("created session {}", session.session_id);
                session
            }
        };
        if let Some(repository) = &input.repository {
            session.record_cloned_repo(repository);
        }
        timer.mark("storage");

        let run_id = generate_run_id();
        let model = input
            .model
            .clone()
            .unwrap_or_else(|| session.config.default_model.clone());
        let proxy_token = self.tokens.create(CreateToken {
            sandbox_id: session.sandbox_id.clone(),
            session_id: Some(session.session_id.clone()),
            expires_in: Some("2h".to_string()),
        })?;
        timer.mark("token");

        let title = input
            .title
            .clone()
            .unwrap_or_else(|| summarize_task(&input.task));
        let params = TaskParams {
            session_id: session.session_id.clone(),
            sandbox_id: session.sandbox_id.clone(),
            task: input.task.clone(),
            model,
            run_id: run_id.clone(),
            title,
            repository_url: input.repository.clone(),
            branch: input.branch.clone(),
            proxy_token,
            proxy_base_url: rewrite_local_host(&self.base_url),
            existing_opencode_session_id: session.opencode_session_id.clone(),
        };
        self.engine.submit(&run_id, params).await?;
        timer.mark("workflow");

        session.last_activity = Utc::now().timestamp_millis();
        self.sessions.put_session(&session).await?;
        timer.mark("storage");

        Ok(RunTaskOutput {
            run_id,
            session_id: session.session_id.clone(),
            status: "started",
            web_ui_url: session.web_ui_url,
        })
    }

    /// The canonical polling endpoint: project the run, plus the session's
    /// web UI URL when the session still exists.
    pub async fn get_result(
        &self,
        input: GetResultInput,
        timer: &mut PhaseTimer,
    ) -> ToolResult<Value> {
        timer.mark("validate");
        let run = self
            .runs
            .get_run(&input.run_id)
            .await?
            .ok_or_else(|| ToolError::RunNotFound(input.run_id.clone()))?;

        let web_ui_url = self
            .sessions
            .get_session(&run.session_id)
            .await?
            .map(|session| session.web_ui_url);
        timer.mark("storage");

        let mut projection = json!({
            "runId": run.run_id,
            "sessionId": run.session_id,
            "status": run.status,
            "title": run.title,
            "model": run.model,
            "startedAt": run.started_at,
        });
        if let Some(completed_at) = run.completed_at {
            projection["completedAt"] = json!(completed_at);
        }
        if let Some(result) = run.result {
            projection["result"] = to_value(&result)?;
        }
        if let Some(url) = web_ui_url {
            projection["webUiUrl"] = json!(url);
        }
        Ok(projection)
    }

    /// Filtered listing over the global run index; fetches one extra row to
    /// report `hasMore`.
    pub async fn list_runs(
        &self,
        input: ListRunsInput,
        timer: &mut PhaseTimer,
    ) -> ToolResult<Value> {
        let limit = input.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=100).contains(&limit) {
            return Err(ToolError::Validation(format!(
                "limit must be between 1 and 100, got {limit}"
            )));
        }
        let status = input
            .status
            .as_deref()
            .map(|s| s.parse::<RunStatus>().map_err(ToolError::Validation))
            .transpose()?;
        timer.mark("validate");

        let page = self
            .runs
            .list_runs(&RunFilter {
                session_id: input.session_id.clone(),
                status,
                before: input.before,
                limit: Some(limit + 1),
            })
            .await?;
        timer.mark("storage");

        let has_more = page.entries.len() > limit;
        let runs: Vec<Value> = page
            .entries
            .into_iter()
            .take(limit)
            .map(|entry| to_value(&entry))
            .collect::<ToolResult<_>>()?;

        Ok(json!({
            "runs": runs,
            "total": page.total,
            "hasMore": has_more,
        }))
    }

    fn new_session(&self, input: &RunTaskInput) -> Session {
        let session_id = generate_session_id();
        let now = Utc::now().timestamp_millis();
        Session {
            sandbox_id: session_id.clone(),
            web_ui_url: format!("{}/session/{session_id}/", self.base_url),
            session_id,
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
            workspace_path: "/workspace".to_string(),
            repository: input.repository.as_ref().map(|url| Repository {
                url: url.clone(),
                branch: input.branch.clone(),
            }),
            title: input.title.clone(),
            config: SessionConfig {
                default_model: self.default_model.clone(),
            },
            opencode_session_id: None,
            cloned_repos: input.repository.as_ref().map(|url| vec![url.clone()]),
        }
    }
}

fn validate_run_task(input: &RunTaskInput) -> ToolResult<()> {
    if input.task.trim().is_empty() {
        return Err(ToolError::Validation("task must not be empty".to_string()));
    }
    if input.task.len() > MAX_TASK_LEN {
        return Err(ToolError::Validation(format!(
            "task exceeds {MAX_TASK_LEN} characters"
        )));
    }
    if let Some(id) = &input.session_id {
        if !validate_session_id(id) {
            return Err(ToolError::Validation(format!("invalid sessionId: {id:?}")));
        }
    }
    if let Some(repository) = &input.repository {
        if !repository.starts_with("https://github.com/") {
            return Err(ToolError::Validation(
                "repository must start with https://github.com/".to_string(),
            ));
        }
    }
    Ok(())
}

/// Short run title derived from the first line of the task.
fn summarize_task(task: &str) -> String {
    let line = task.lines().next().unwrap_or(task).trim();
    let mut summary: String = line.chars().take(79).collect();
    if line.chars().count() > 79 {
        summary.push('…');
    }
    summary
}

fn parse_input<T: serde::de::DeserializeOwned>(arguments: Value) -> ToolResult<T> {
    serde_json::from_value(arguments).map_err(|e| ToolError::Validation(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> ToolResult<Value> {
    serde_json::to_value(value).map_err(|e| ToolError::Unknown(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_run_task_rejects_bad_inputs() {
        let base = RunTaskInput {
            task: "do it".to_string(),
            session_id: None,
            repository: None,
            branch: None,
            model: None,
            title: None,
        };

        assert!(validate_run_task(&base).is_ok());

        let mut bad = base.clone();
        bad.task = "   ".to_string();
        assert!(validate_run_task(&bad).is_err());

        let mut bad = base.clone();
        bad.task = "x".repeat(MAX_TASK_LEN + 1);
        assert!(validate_run_task(&bad).is_err());

        let mut bad = base.clone();
        bad.session_id = Some("Not-Valid".to_string());
        assert!(validate_run_task(&bad).is_err());

        let mut bad = base;
        bad.repository = Some("https://gitlab.com/u/r".to_string());
        assert!(validate_run_task(&bad).is_err());
    }

    #[test]
    fn test_summarize_task() {
        assert_eq!(summarize_task("Fix the bug\nand more"), "Fix the bug");
        let long = "a".repeat(200);
        let summary = summarize_task(&long);
        assert!(summary.chars().count() <= 80);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_parse_input_rejects_unknown_fields() {
        let err = parse_input::<GetResultInput>(json!({"runId": "run-1", "bogus": 1})).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }
}
