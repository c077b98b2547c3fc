//! HTTP launcher and client for the agent subprocess.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;

use crate::sandbox::{SandboxRuntime, StartProcessRequest};

use super::types::{AgentSession, PromptRequest, PromptResponse};
use super::{AgentError, AgentHandle, AgentLaunchConfig, AgentLauncher, AgentResult};

/// Config file the agent subprocess reads on startup.
const AGENT_CONFIG_PATH: &str = "/root/.config/opencode/opencode.json";

/// Process id under which the subprocess is tracked in the sandbox.
const AGENT_PROCESS_ID: &str = "opencode-serve";

/// Header scoping agent requests to a workspace directory.
const DIRECTORY_HEADER: &str = "x-opencode-directory";

/// How long to wait for the subprocess to accept connections.
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Launches the agent via the sandbox runtime and talks to it over its
/// exposed port.
pub struct HttpAgentLauncher {
    runtime: Arc<dyn SandboxRuntime>,
    client: reqwest::Client,
    agent_port: u16,
}

impl HttpAgentLauncher {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, agent_port: u16) -> Self {
        Self {
            runtime,
            client: reqwest::Client::new(),
            agent_port,
        }
    }

    async fn wait_ready(&self, base_url: &str) -> AgentResult<()> {
        let start = tokio::time::Instant::now();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self
                .client
                .get(format!("{base_url}/session"))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!("agent not ready yet (status {})", response.status());
                }
                Err(err) => {
                    debug!("agent not ready yet (attempt {attempts}): {err}");
                }
            }
            if start.elapsed() >= READY_TIMEOUT {
                return Err(AgentError::Launch(format!(
                    "agent did not become ready within {READY_TIMEOUT:?} ({attempts} attempts)"
                )));
            }
            let backoff_ms = (attempts.min(20) as u64) * 100;
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

#[async_trait]
impl AgentLauncher for HttpAgentLauncher {
    async fn launch(
        &self,
        sandbox_id: &str,
        config: AgentLaunchConfig,
    ) -> AgentResult<Box<dyn AgentHandle>> {
        // The agent's upstream is the credential proxy; its API key is the
        // short-lived proxy token.
        let agent_config = json!({
            "provider": {
                "anthropic": {
                    "options": {
                        "baseURL": format!("{}/proxy/anthropic", config.proxy_base_url),
                        "apiKey": config.proxy_token,
                    }
                }
            },
            "model": format!("anthropic/{}", config.model),
        });
        self.runtime
            .write_file(
                sandbox_id,
                AGENT_CONFIG_PATH,
                serde_json::to_vec_pretty(&agent_config)
                    .map_err(|e| AgentError::ParseError(e.to_string()))?
                    .as_slice(),
            )
            .await?;

        self.runtime
            .start_process(
                sandbox_id,
                StartProcessRequest {
                    process_id: AGENT_PROCESS_ID.to_string(),
                    command: format!(
                        "opencode serve --hostname 127.0.0.1 --port {}",
                        self.agent_port
                    ),
                    cwd: Some(config.workspace_path.clone()),
                    env: HashMap::new(),
                },
            )
            .await?;

        let base_url = self.runtime.expose_port(sandbox_id, self.agent_port).await?;
        self.wait_ready(&base_url).await?;

        Ok(Box::new(HttpAgentHandle {
            runtime: self.runtime.clone(),
            client: self.client.clone(),
            sandbox_id: sandbox_id.to_string(),
            base_url,
        }))
    }
}

struct HttpAgentHandle {
    runtime: Arc<dyn SandboxRuntime>,
    client: reqwest::Client,
    sandbox_id: String,
    base_url: String,
}

impl HttpAgentHandle {
    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> AgentResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| AgentError::ParseError(e.to_string()))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(AgentError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl AgentHandle for HttpAgentHandle {
    async fn list_sessions(&self, directory: &str) -> AgentResult<Vec<AgentSession>> {
        let response = self
            .client
            .get(format!("{}/session", self.base_url))
            .header(DIRECTORY_HEADER, directory)
            .send()
            .await?;
        let sessions: Vec<AgentSession> = Self::parse(response).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.directory.as_deref().is_none_or(|d| d == directory))
            .collect())
    }

    async fn create_session(&self, directory: &str) -> AgentResult<AgentSession> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .header(DIRECTORY_HEADER, directory)
            .json(&json!({}))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn prompt(
        &self,
        session_id: &str,
        request: PromptRequest,
    ) -> AgentResult<PromptResponse> {
        let response = self
            .client
            .post(format!("{}/session/{session_id}/message", self.base_url))
            .json(&request)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn close(&self) {
        if let Err(e) = self
            .runtime
            .stop_process(&self.sandbox_id, AGENT_PROCESS_ID)
            .await
        {
            warn!("failed to stop agent in sandbox {}: {e}", self.sandbox_id);
        }
    }
}
