//! Sandbox runtime adapter.
//!
//! The sandbox itself is an external service: a per-session container with
//! a filesystem, shell exec, file streaming, a git helper, and port
//! exposure. This module is the thin client to it, plus the idempotent
//! "ensure ready" preparation and agent-state backup/restore built on top.

mod backup;
mod error;
mod prepare;
mod runtime;
pub mod testing;

pub use backup::{backup_session, restore_backup};
pub use error::{SandboxError, SandboxResult};
pub use prepare::{ensure_sandbox_ready, PrepareOutcome, PrepareParams};
pub use runtime::{
    ExecOutput, ExecRequest, GitCloneRequest, HttpSandboxRuntime, SandboxRuntime,
    StartProcessRequest, DEFAULT_EXEC_TIMEOUT,
};
