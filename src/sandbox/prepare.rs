//! Idempotent sandbox preparation.
//!
//! Brings a sandbox to the point where the coding agent can run: proxy
//! credentials in the workspace env file, git routed through the control
//! plane's proxy, prior agent state restored, and the repository cloned.
//! Every check-then-act pair short-circuits when the work is already done,
//! so replaying the step is safe.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::storage::ObjectStore;

use super::backup::restore_backup;
use super::error::SandboxResult;
use super::runtime::{ExecRequest, GitCloneRequest, SandboxRuntime};

/// Workspace root inside every sandbox.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Env file the agent subprocess reads its upstream configuration from.
pub const WORKSPACE_ENV_FILE: &str = "/workspace/.env";

/// Directory the agent keeps its own session state under.
pub const AGENT_STATE_DIR: &str = "~/.local/share/opencode";

/// The storage subdirectory that gets backed up and restored.
pub const AGENT_STORAGE_DIR: &str = "~/.local/share/opencode/storage";

/// Inputs to `ensure_sandbox_ready`.
#[derive(Debug, Clone)]
pub struct PrepareParams {
    pub sandbox_id: String,
    pub session_id: String,
    /// Short-lived proxy token; the only credential the sandbox sees.
    pub proxy_token: String,
    /// Proxy base URL as reachable from inside the sandbox.
    pub container_proxy_url: String,
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub git_user_name: String,
    pub git_user_email: String,
}

/// What preparation actually did. All flags are false on a replay against
/// an already-prepared sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOutcome {
    pub workspace_path: String,
    pub restored_backup: bool,
    pub cloned_repo: bool,
    pub configured_proxy: bool,
}

/// Derive the checkout directory name from a repository URL.
pub fn repo_dir_name(url: &str) -> String {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("repo");
    name.strip_suffix(".git").unwrap_or(name).to_string()
}

/// Make a sandbox ready to execute a task.
pub async fn ensure_sandbox_ready(
    runtime: &dyn SandboxRuntime,
    store: &dyn ObjectStore,
    params: &PrepareParams,
) -> SandboxResult<PrepareOutcome> {
    let configured_proxy = configure_proxy(runtime, params).await?;
    let restored_backup = restore_agent_state(runtime, store, params).await?;
    let (workspace_path, cloned_repo) = ensure_repository(runtime, params).await?;

    info!(
        "sandbox {} ready: workspace={workspace_path} configured_proxy={configured_proxy} \
         restored_backup={restored_backup} cloned_repo={cloned_repo}",
        params.sandbox_id
    );

    Ok(PrepareOutcome {
        workspace_path,
        restored_backup,
        cloned_repo,
        configured_proxy,
    })
}

/// Write proxy credentials into the workspace env file and route git
/// through the proxy. Skipped when the env file already carries the proxy
/// base URL.
async fn configure_proxy(
    runtime: &dyn SandboxRuntime,
    params: &PrepareParams,
) -> SandboxResult<bool> {
    let check = runtime
        .exec(
            &params.sandbox_id,
            ExecRequest::shell(format!("grep -q ANTHROPIC_BASE_URL {WORKSPACE_ENV_FILE}")),
        )
        .await?;
    if check.success() {
        debug!("sandbox {} proxy already configured", params.sandbox_id);
        return Ok(false);
    }

    let proxy = &params.container_proxy_url;
    let token = &params.proxy_token;
    let commands = [
        format!(
            "echo 'ANTHROPIC_BASE_URL={proxy}/proxy/anthropic' >> {WORKSPACE_ENV_FILE} && \
             echo 'ANTHROPIC_API_KEY={token}' >> {WORKSPACE_ENV_FILE}"
        ),
        format!("git config --global url.{proxy}/proxy/github/.insteadOf https://github.com/"),
        format!("git config --global http.extraheader 'Authorization: Bearer {token}'"),
        format!("git config --global user.email '{}'", params.git_user_email),
        format!("git config --global user.name '{}'", params.git_user_name),
    ];
    for command in &commands {
        runtime
            .exec(&params.sandbox_id, ExecRequest::shell(command.clone()))
            .await?
            .check(command)?;
    }
    Ok(true)
}

/// Restore the agent's state directory from the last backup, if the
/// directory is missing and a backup exists.
async fn restore_agent_state(
    runtime: &dyn SandboxRuntime,
    store: &dyn ObjectStore,
    params: &PrepareParams,
) -> SandboxResult<bool> {
    let check = runtime
        .exec(
            &params.sandbox_id,
            ExecRequest::shell(format!("test -d {AGENT_STORAGE_DIR}")),
        )
        .await?;
    if check.success() {
        return Ok(false);
    }

    restore_backup(runtime, store, &params.sandbox_id, &params.session_id).await
}

/// Clone the repository on first use; fetch (and optionally check out the
/// requested branch) on subsequent runs.
async fn ensure_repository(
    runtime: &dyn SandboxRuntime,
    params: &PrepareParams,
) -> SandboxResult<(String, bool)> {
    let Some(url) = &params.repository_url else {
        return Ok((WORKSPACE_ROOT.to_string(), false));
    };

    let repo = repo_dir_name(url);
    let workspace = format!("{WORKSPACE_ROOT}/{repo}");

    let check = runtime
        .exec(
            &params.sandbox_id,
            ExecRequest::shell(format!("test -d {workspace}/.git")),
        )
        .await?;

    if !check.success() {
        runtime
            .git_clone(
                &params.sandbox_id,
                GitCloneRequest {
                    url: url.clone(),
                    branch: params.branch.clone().unwrap_or_else(|| "main".to_string()),
                    dest: workspace.clone(),
                },
            )
            .await?;
        return Ok((workspace, true));
    }

    runtime
        .exec(
            &params.sandbox_id,
            ExecRequest::shell("git fetch").in_dir(workspace.as_str()),
        )
        .await?
        .check("git fetch")?;
    if let Some(branch) = &params.branch {
        let command = format!("git checkout {branch}");
        runtime
            .exec(
                &params.sandbox_id,
                ExecRequest::shell(command.clone()).in_dir(workspace.as_str()),
            )
            .await?
            .check(&command)?;
    }
    Ok((workspace, false))
}
