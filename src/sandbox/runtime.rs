//! Sandbox runtime client.
//!
//! `SandboxRuntime` is the seam between the control plane and the external
//! sandbox service. The HTTP implementation talks to the runtime's REST
//! API; tests use the scripted implementation in `testing`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};

/// Default timeout applied to `exec` when the caller does not override it.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// A shell command to run inside a sandbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    /// Interpreted by `sh -c` inside the sandbox.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Seconds; the runtime applies `DEFAULT_EXEC_TIMEOUT` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ExecRequest {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            timeout_secs: None,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Result of an `exec`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Promote a non-zero exit into an error naming the command.
    pub fn check(self, command: &str) -> SandboxResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SandboxError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Clone request handed to the runtime's git helper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCloneRequest {
    pub url: String,
    pub branch: String,
    /// Absolute destination directory inside the sandbox.
    pub dest: String,
}

/// A long-lived background process inside the sandbox. Starts never time
/// out from the control plane's side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessRequest {
    /// Caller-chosen id used to address the process later.
    pub process_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// The unified interface to the sandbox runtime.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create the sandbox if it does not exist yet. Idempotent.
    async fn ensure_sandbox(&self, sandbox_id: &str) -> SandboxResult<()>;

    /// Run a shell command to completion.
    async fn exec(&self, sandbox_id: &str, request: ExecRequest) -> SandboxResult<ExecOutput>;

    /// Read a file's bytes, or `None` if it does not exist.
    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<Option<Vec<u8>>>;

    /// Write a file, creating parent directories.
    async fn write_file(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> SandboxResult<()>;

    /// Clone a repository via the runtime's git helper.
    async fn git_clone(&self, sandbox_id: &str, request: GitCloneRequest) -> SandboxResult<()>;

    /// Start a background process.
    async fn start_process(
        &self,
        sandbox_id: &str,
        request: StartProcessRequest,
    ) -> SandboxResult<()>;

    /// Stop a background process by its caller-chosen id.
    async fn stop_process(&self, sandbox_id: &str, process_id: &str) -> SandboxResult<()>;

    /// Expose a sandbox-local port; returns the URL the control plane can
    /// reach it on.
    async fn expose_port(&self, sandbox_id: &str, port: u16) -> SandboxResult<String>;
}

/// HTTP client to a remote sandbox runtime.
#[derive(Clone)]
pub struct HttpSandboxRuntime {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExposedPort {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RuntimeErrorBody {
    error: String,
}

impl HttpSandboxRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build sandbox http client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, sandbox_id: &str, suffix: &str) -> String {
        format!(
            "{}/v1/sandboxes/{sandbox_id}{suffix}",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> SandboxResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| SandboxError::ParseError(e.to_string()))
        } else {
            let message = match response.json::<RuntimeErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            Err(SandboxError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl SandboxRuntime for HttpSandboxRuntime {
    async fn ensure_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        let url = self.url(sandbox_id, "");
        let response = self.client.put(&url).send().await.map_err(|e| {
            SandboxError::ConnectionFailed {
                url: url.clone(),
                message: e.to_string(),
            }
        })?;
        if response.status() == StatusCode::CONFLICT {
            // Already exists.
            return Ok(());
        }
        self.handle_response::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }

    async fn exec(&self, sandbox_id: &str, mut request: ExecRequest) -> SandboxResult<ExecOutput> {
        if request.timeout_secs.is_none() {
            request.timeout_secs = Some(DEFAULT_EXEC_TIMEOUT.as_secs());
        }
        let response = self
            .client
            .post(self.url(sandbox_id, "/exec"))
            .json(&request)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.url(sandbox_id, "/files"))
            .query(&[("path", path)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                message: format!("reading {path}"),
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, bytes: &[u8]) -> SandboxResult<()> {
        let response = self
            .client
            .put(self.url(sandbox_id, "/files"))
            .query(&[("path", path)])
            .body(bytes.to_vec())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                message: format!("writing {path}"),
            });
        }
        Ok(())
    }

    async fn git_clone(&self, sandbox_id: &str, request: GitCloneRequest) -> SandboxResult<()> {
        let response = self
            .client
            .post(self.url(sandbox_id, "/git/clone"))
            .json(&request)
            .send()
            .await?;
        self.handle_response::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }

    async fn start_process(
        &self,
        sandbox_id: &str,
        request: StartProcessRequest,
    ) -> SandboxResult<()> {
        let response = self
            .client
            .post(self.url(sandbox_id, "/processes"))
            .json(&request)
            .send()
            .await?;
        self.handle_response::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }

    async fn stop_process(&self, sandbox_id: &str, process_id: &str) -> SandboxResult<()> {
        let response = self
            .client
            .delete(self.url(sandbox_id, &format!("/processes/{process_id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Already gone.
            return Ok(());
        }
        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                message: format!("stopping process {process_id}"),
            });
        }
        Ok(())
    }

    async fn expose_port(&self, sandbox_id: &str, port: u16) -> SandboxResult<String> {
        let response = self
            .client
            .post(self.url(sandbox_id, &format!("/ports/{port}/expose")))
            .send()
            .await?;
        let exposed: ExposedPort = self.handle_response(response).await?;
        Ok(exposed.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_construction() {
        let runtime = HttpSandboxRuntime::new("http://runtime:9100/");
        assert_eq!(
            runtime.url("ab12cd34", "/exec"),
            "http://runtime:9100/v1/sandboxes/ab12cd34/exec"
        );
    }

    #[test]
    fn test_exec_output_check() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: "hi".to_string(),
            stderr: String::new(),
        };
        assert!(ok.check("echo hi").is_ok());

        let bad = ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        assert!(matches!(
            bad.check("false"),
            Err(SandboxError::CommandFailed { exit_code: 1, .. })
        ));
    }
}
