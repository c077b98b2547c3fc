//! Wide-event telemetry.
//!
//! One event per tool call and one per workflow, emitted as
//! newline-delimited JSON on stdout. Emission is synchronous and never
//! fails the caller.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// Service name stamped on every event.
pub const SERVICE_NAME: &str = "sandbox-mcp";

/// Crate version stamped on every event.
pub fn service_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Sub-phase stopwatch for tool calls. Each `mark` records the time since
/// the previous mark under the given phase name.
#[derive(Debug)]
pub struct PhaseTimer {
    origin: Instant,
    last: Instant,
    phases: BTreeMap<String, u64>,
}

impl PhaseTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            origin: now,
            last: now,
            phases: BTreeMap::new(),
        }
    }

    pub fn mark(&mut self, phase: &str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_millis() as u64;
        *self.phases.entry(phase.to_string()).or_insert(0) += elapsed;
        self.last = now;
    }

    pub fn total_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn into_phases(self) -> BTreeMap<String, u64> {
        self.phases
    }
}

/// Event emitted once per tool invocation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub event: &'static str,
    pub timestamp: String,
    pub request_id: String,
    pub tool: String,
    pub service: &'static str,
    pub version: &'static str,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases: Option<BTreeMap<String, u64>>,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolCallEvent {
    pub fn new(tool: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            event: "tool.call",
            timestamp: Utc::now().to_rfc3339(),
            request_id: request_id.into(),
            tool: tool.into(),
            service: SERVICE_NAME,
            version: service_version(),
            duration_ms: 0,
            phases: None,
            outcome: "ok",
            error: None,
            metadata: None,
        }
    }
}

/// Error detail on a failed workflow event, tagged with the failing phase.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorInfo {
    pub phase: String,
    pub message: String,
}

/// Event emitted once per workflow execution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub event: &'static str,
    pub timestamp: String,
    pub workflow_id: String,
    pub run_id: String,
    pub session_id: String,
    pub service: &'static str,
    pub version: &'static str,
    pub duration_ms: u64,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WorkflowEvent {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            event: "workflow",
            timestamp: Utc::now().to_rfc3339(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            session_id: session_id.into(),
            service: SERVICE_NAME,
            version: service_version(),
            duration_ms: 0,
            outcome: "ok",
            error: None,
            metadata: None,
        }
    }
}

/// Stdout wide-event emitter.
#[derive(Debug, Clone)]
pub struct Telemetry {
    enabled: bool,
}

impl Telemetry {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn emit_tool_call(&self, event: ToolCallEvent) {
        self.emit(&event);
    }

    pub fn emit_workflow(&self, event: WorkflowEvent) {
        self.emit(&event);
    }

    fn emit<T: Serialize>(&self, event: &T) {
        if !self.enabled {
            return;
        }
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    }
}
