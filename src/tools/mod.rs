//! Tool dispatch surface.
//!
//! Three externally visible tools: `run_task`, `get_result`, `list_runs`.
//! Inputs are schema-validated; violations return a structured error with
//! `code` and `message`. Every invocation emits one wide telemetry event.

mod dispatcher;
mod error;

pub use dispatcher::{
    GetResultInput, ListRunsInput, RunTaskInput, RunTaskOutput, ToolDispatcher, DEFAULT_LIST_LIMIT,
};
pub use error::{ToolError, ToolResult};
