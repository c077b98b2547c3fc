//! The task-execution workflow: create-run, prepare-sandbox, execute-task,
//! complete-run, backup-session.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::agent::{
    extract_text, AgentHandle, AgentLaunchConfig, AgentLauncher, AgentResult, PromptRequest,
    TokenUsage,
};
use crate::run::{Run, RunCompletion, RunStatus};
use crate::sandbox::{backup_session, ensure_sandbox_ready, PrepareParams, SandboxRuntime};
use crate::session::SessionStore;
use crate::storage::ObjectStore;

use super::engine::StepContext;
use super::WorkflowResult;

/// Fixed suffix appended to every task so the agent closes with a
/// structured summary.
pub const TASK_SUMMARY_SUFFIX: &str = "\n\nWhen you are finished, end your reply with a structured \
summary: what you accomplished, which files you changed, any commits you made, and any warnings \
or follow-ups.";

/// Input to one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    pub session_id: String,
    pub sandbox_id: String,
    pub task: String,
    pub model: String,
    pub run_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub proxy_token: String,
    /// Proxy base URL as reachable from inside the sandbox.
    pub proxy_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_opencode_session_id: Option<String>,
}

/// Output of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opencode_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

/// Outcome of the execute-task step. Never an error: failures are captured
/// so complete-run always runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentOutcome {
    success: bool,
    output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    opencode_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tokens: Option<TokenUsage>,
}

/// Executes the five workflow steps against the injected stores, sandbox
/// runtime, and agent launcher.
pub struct TaskExecutor {
    sessions: SessionStore,
    runs: crate::run::RunStore,
    store: Arc<dyn ObjectStore>,
    runtime: Arc<dyn SandboxRuntime>,
    launcher: Arc<dyn AgentLauncher>,
    git_user_name: String,
    git_user_email: String,
}

impl TaskExecutor {
    pub fn new(
        sessions: SessionStore,
        runs: crate::run::RunStore,
        store: Arc<dyn ObjectStore>,
        runtime: Arc<dyn SandboxRuntime>,
        launcher: Arc<dyn AgentLauncher>,
        git_user_name: impl Into<String>,
        git_user_email: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            runs,
            store,
            runtime,
            launcher,
            git_user_name: git_user_name.into(),
            git_user_email: git_user_email.into(),
        }
    }

    pub async fn execute(
        &self,
        ctx: &StepContext,
        params: &TaskParams,
    ) -> WorkflowResult<TaskResult> {
        self.create_run(ctx, params).await?;
        let prepared = self.prepare_sandbox(ctx, params).await?;
        let outcome = self.execute_task(ctx, params, &prepared.workspace_path).await?;
        self.complete_run(ctx, params, &prepared.workspace_path, &outcome)
            .await?;
        self.backup(ctx, params).await?;

        Ok(TaskResult {
            success: outcome.success,
            output: Some(outcome.output),
            error: outcome.error,
            title: None,
            opencode_session_id: Some(outcome.opencode_session_id),
            workspace_path: Some(prepared.workspace_path),
            tokens: outcome.tokens,
        })
    }

    /// Step 1: write the run record with status `started`.
    async fn create_run(&self, ctx: &StepContext, params: &TaskParams) -> WorkflowResult<()> {
        ctx.step("create-run", || async {
            let run = Run {
                run_id: params.run_id.clone(),
                session_id: params.session_id.clone(),
                workflow_id: ctx.workflow_id().to_string(),
                status: RunStatus::Started,
                task: params.task.clone(),
                title: params.title.clone(),
                model: params.model.clone(),
                started_at: Utc::now().timestamp_millis(),
                completed_at: None,
                result: None,
            };
            self.runs.put_run(&run).await?;
            Ok(())
        })
        .await
    }

    /// Step 2: make the sandbox ready. A fresh handle is taken from the
    /// runtime here; nothing remote crosses the step boundary.
    async fn prepare_sandbox(
        &self,
        ctx: &StepContext,
        params: &TaskParams,
    ) -> WorkflowResult<crate::sandbox::PrepareOutcome> {
        ctx.step("prepare-sandbox", || async {
            self.runtime.ensure_sandbox(&params.sandbox_id).await?;
            let prepare = PrepareParams {
                sandbox_id: params.sandbox_id.clone(),
                session_id: params.session_id.clone(),
                proxy_token: params.proxy_token.clone(),
                container_proxy_url: params.proxy_base_url.clone(),
                repository_url: params.repository_url.clone(),
                branch: params.branch.clone(),
                git_user_name: self.git_user_name.clone(),
                git_user_email: self.git_user_email.clone(),
            };
            let outcome = ensure_sandbox_ready(self.runtime.as_ref(), self.store.as_ref(), &prepare)
                .await?;
            Ok(outcome)
        })
        .await
    }

    /// Step 3: run the agent. Never fails the workflow; every error is
    /// captured into the outcome so complete-run always runs.
    async fn execute_task(
        &self,
        ctx: &StepContext,
        params: &TaskParams,
        workspace_path: &str,
    ) -> WorkflowResult<AgentOutcome> {
        ctx.step("execute-task", || async {
            match self.try_agent(params, workspace_path).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => Ok(AgentOutcome {
                    success: false,
                    output: String::new(),
                    error: Some(err.to_string()),
                    opencode_session_id: params
                        .existing_opencode_session_id
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                    tokens: None,
                }),
            }
        })
        .await
    }

    async fn try_agent(
        &self,
        params: &TaskParams,
        workspace_path: &str,
    ) -> AgentResult<AgentOutcome> {
        let handle = self
            .launcher
            .launch(
                &params.sandbox_id,
                AgentLaunchConfig {
                    workspace_path: workspace_path.to_string(),
                    proxy_base_url: params.proxy_base_url.clone(),
                    proxy_token: params.proxy_token.clone(),
                    model: params.model.clone(),
                },
            )
            .await?;

        let result = self.drive_agent(handle.as_ref(), params, workspace_path).await;
        handle.close().await;
        result
    }

    async fn drive_agent(
        &self,
        handle: &dyn AgentHandle,
        params: &TaskParams,
        workspace_path: &str,
    ) -> AgentResult<AgentOutcome> {
        let agent_session = match &params.existing_opencode_session_id {
            Some(id) => id.clone(),
            None => {
                let existing = handle.list_sessions(workspace_path).await?;
                match existing.into_iter().next() {
                    Some(session) => {
                        debug!("reusing agent session {}", session.id);
                        session.id
                    }
                    None => handle.create_session(workspace_path).await?.id,
                }
            }
        };

        let prompt = format!("{}{TASK_SUMMARY_SUFFIX}", params.task);
        let response = handle
            .prompt(&agent_session, PromptRequest::text(prompt, params.model.as_str()))
            .await?;

        let output = extract_text(&response.parts);
        if let Some(error) = response.info.error {
            return Ok(AgentOutcome {
                success: false,
                output,
                error: Some(error.describe()),
                opencode_session_id: agent_session,
                tokens: response.info.tokens,
            });
        }
        Ok(AgentOutcome {
            success: true,
            output,
            error: None,
            opencode_session_id: agent_session,
            tokens: response.info.tokens,
        })
    }

    /// Step 4: terminal run transition, plus a best-effort session update.
    async fn complete_run(
        &self,
        ctx: &StepContext,
        params: &TaskParams,
        workspace_path: &str,
        outcome: &AgentOutcome,
    ) -> WorkflowResult<()> {
        ctx.step("complete-run", || async {
            self.runs
                .complete_run(
                    &params.run_id,
                    RunCompletion {
                        success: outcome.success,
                        output: Some(outcome.output.clone()),
                        error: outcome.error.clone(),
                        title: None,
                    },
                )
                .await?;

            match self.sessions.get_session(&params.session_id).await {
                Ok(Some(mut session)) => {
                    session.opencode_session_id = Some(outcome.opencode_session_id.clone());
                    session.workspace_path = workspace_path.to_string();
                    session.last_activity = Utc::now().timestamp_millis();
                    if let Err(e) = self.sessions.put_session(&session).await {
                        warn!("failed to update session {}: {e}", params.session_id);
                    }
                }
                Ok(None) => {
                    warn!(
                        "session {} vanished before run {} completed",
                        params.session_id, params.run_id
                    );
                }
                Err(e) => {
                    warn!("failed to load session {}: {e}", params.session_id);
                }
            }
            Ok(())
        })
        .await
    }

    /// Step 5: advisory agent-state snapshot. Never causal to run success.
    async fn backup(&self, ctx: &StepContext, params: &TaskParams) -> WorkflowResult<()> {
        ctx.step("backup-session", || async {
            let uploaded = backup_session(
                self.runtime.as_ref(),
                self.store.as_ref(),
                &params.sandbox_id,
                &params.session_id,
            )
            .await;
            Ok(uploaded)
        })
        .await
        .map(|_: bool| ())
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor").finish_non_exhaustive()
    }
}
