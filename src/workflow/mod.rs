//! Durable task-execution workflow.
//!
//! The workflow is a step-addressable state machine: each step is named,
//! each step's output is memoized, and a replayed workflow skips steps
//! whose outputs already exist. Steps are written so their side effects
//! are either idempotent or observable to a subsequent read.

mod engine;
mod task;

pub use engine::{InProcessWorkflowEngine, StepContext, WorkflowEngine};
pub use task::{TaskExecutor, TaskParams, TaskResult, TASK_SUMMARY_SUFFIX};

use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors escaping workflow steps. `execute-task` never produces one; the
/// other steps may, and the engine records which step failed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step {step} failed: {message}")]
    Step { step: &'static str, message: String },

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error(transparent)]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("workflow state serialization failed: {0}")]
    Serialization(String),
}

impl WorkflowError {
    /// The step name attributed to this error, for telemetry.
    pub fn phase(&self) -> &str {
        match self {
            WorkflowError::Step { step, .. } => step,
            WorkflowError::Storage(_) => "storage",
            WorkflowError::Sandbox(_) => "sandbox",
            WorkflowError::Serialization(_) => "serialization",
        }
    }
}
