//! Coding-agent I/O.
//!
//! The coding agent is a subprocess inside the sandbox with an HTTP API on
//! a known port. The control plane starts it (pointing its upstream at the
//! credential proxy), resolves or creates an agent session for the
//! workspace, submits the task, and extracts the text of the response.

mod client;
pub mod testing;
mod types;

pub use client::HttpAgentLauncher;
pub use types::{
    extract_text, AgentApiError, AgentSession, MessagePart, ModelRef, PromptInfo, PromptPart,
    PromptRequest, PromptResponse, TokenUsage,
};

use async_trait::async_trait;
use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors from launching or talking to the agent subprocess.
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP request to the agent failed.
    #[error("agent request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The agent returned an error response.
    #[error("agent error: {message} (status: {status})")]
    Api { status: u16, message: String },

    /// Starting the subprocess or exposing its port failed.
    #[error("failed to launch agent: {0}")]
    Launch(String),

    /// Failed to parse an agent response.
    #[error("failed to parse agent response: {0}")]
    ParseError(String),
}

impl From<crate::sandbox::SandboxError> for AgentError {
    fn from(err: crate::sandbox::SandboxError) -> Self {
        AgentError::Launch(err.to_string())
    }
}

/// Launch configuration for the agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentLaunchConfig {
    pub workspace_path: String,
    /// Proxy base URL as reachable from inside the sandbox.
    pub proxy_base_url: String,
    /// The short-lived proxy token the agent uses as its API key.
    pub proxy_token: String,
    pub model: String,
}

/// A running agent subprocess.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// List agent sessions scoped to a workspace directory.
    async fn list_sessions(&self, directory: &str) -> AgentResult<Vec<AgentSession>>;

    /// Create a new agent session rooted at a workspace directory.
    async fn create_session(&self, directory: &str) -> AgentResult<AgentSession>;

    /// Submit a prompt and wait for the full response.
    async fn prompt(&self, session_id: &str, request: PromptRequest) -> AgentResult<PromptResponse>;

    /// Shut the subprocess down. Best-effort.
    async fn close(&self);
}

/// Starts agent subprocesses inside sandboxes.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(
        &self,
        sandbox_id: &str,
        config: AgentLaunchConfig,
    ) -> AgentResult<Box<dyn AgentHandle>>;
}
