//! Tool error taxonomy.
//!
//! Domain errors carry their own tag; anything unrecognized maps to
//! `UNKNOWN_ERROR`.

use serde_json::json;
use thiserror::Error;

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Structured errors surfaced to tool callers.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Session \"{0}\" not found")]
    SessionNotFound(String),

    #[error("Run \"{0}\" not found")]
    RunNotFound(String),

    /// Schema failure on tool input.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error("{0}")]
    Token(String),

    #[error("{0}")]
    Workflow(String),

    #[error("{0}")]
    Unknown(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::SessionNotFound(_) => "SessionNotFoundError",
            ToolError::RunNotFound(_) => "RunNotFoundError",
            ToolError::Validation(_) => "ValidationError",
            ToolError::Storage(_) => "StorageError",
            ToolError::Token(_) => "TokenError",
            ToolError::Workflow(_) => "WorkflowError",
            ToolError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// The `{code, message}` body returned to callers.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<crate::token::TokenError> for ToolError {
    fn from(err: crate::token::TokenError) -> Self {
        ToolError::Token(err.to_string())
    }
}

impl From<crate::workflow::WorkflowError> for ToolError {
    fn from(err: crate::workflow::WorkflowError) -> Self {
        ToolError::Workflow(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_message() {
        let err = ToolError::SessionNotFound("does-not-exist".to_string());
        assert_eq!(err.to_string(), "Session \"does-not-exist\" not found");
        let body = err.to_body();
        assert_eq!(body["code"], "SessionNotFoundError");
        assert_eq!(body["message"], "Session \"does-not-exist\" not found");
    }

    #[test]
    fn test_run_not_found_code() {
        assert_eq!(
            ToolError::RunNotFound("run-0".to_string()).code(),
            "RunNotFoundError"
        );
    }
}
