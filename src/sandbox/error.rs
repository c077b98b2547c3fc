//! Sandbox adapter error types.

use thiserror::Error;

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors that can occur talking to the sandbox runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// HTTP request to the runtime failed.
    #[error("sandbox request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The runtime returned an error response.
    #[error("sandbox runtime error: {message} (status: {status})")]
    Api { status: u16, message: String },

    /// A command inside the sandbox exited non-zero.
    #[error("command failed with exit code {exit_code}: {command}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Failed to connect to the runtime.
    #[error("failed to connect to sandbox runtime at {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Failed to parse a runtime response.
    #[error("failed to parse sandbox response: {0}")]
    ParseError(String),
}
