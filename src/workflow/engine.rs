//! Workflow engine: durable step execution with memoized outputs.
//!
//! The engine guarantees at-most-one live execution per workflow id and
//! replays memoized step outputs when a workflow is resubmitted.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::telemetry::{Telemetry, WorkflowErrorInfo, WorkflowEvent};

use super::task::{TaskExecutor, TaskParams};
use super::{WorkflowError, WorkflowResult};

/// Per-workflow step memo handed to the executor. `step` returns the
/// memoized output when the step already ran; otherwise it runs the body
/// and records the output.
#[derive(Clone)]
pub struct StepContext {
    workflow_id: String,
    memo: Arc<DashMap<String, Value>>,
}

impl StepContext {
    pub fn new(workflow_id: impl Into<String>, memo: Arc<DashMap<String, Value>>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            memo,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub async fn step<T, F, Fut>(&self, name: &'static str, body: F) -> WorkflowResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkflowResult<T>>,
    {
        if let Some(output) = self.memo.get(name) {
            debug!("workflow {}: replaying step {name}", self.workflow_id);
            return serde_json::from_value(output.clone())
                .map_err(|e| WorkflowError::Serialization(format!("{name}: {e}")));
        }

        debug!("workflow {}: running step {name}", self.workflow_id);
        let output = body().await?;
        let value = serde_json::to_value(&output)
            .map_err(|e| WorkflowError::Serialization(format!("{name}: {e}")))?;
        self.memo.insert(name.to_string(), value);
        Ok(output)
    }
}

/// Submission interface the dispatcher depends on. `submit` returns once
/// the workflow is accepted, not once it completes.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn submit(&self, workflow_id: &str, params: TaskParams) -> WorkflowResult<()>;
}

/// In-process engine backed by tokio tasks. Step memos are kept per
/// workflow id, so resubmitting an id replays its completed steps.
pub struct InProcessWorkflowEngine {
    executor: Arc<TaskExecutor>,
    telemetry: Telemetry,
    running: Arc<DashMap<String, JoinHandle<()>>>,
    memos: Arc<DashMap<String, Arc<DashMap<String, Value>>>>,
}

impl InProcessWorkflowEngine {
    pub fn new(executor: Arc<TaskExecutor>, telemetry: Telemetry) -> Self {
        Self {
            executor,
            telemetry,
            running: Arc::new(DashMap::new()),
            memos: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a previously submitted workflow to finish. Test and
    /// shutdown helper; the tool surface never blocks on this.
    pub async fn wait(&self, workflow_id: &str) {
        let handle = self.running.remove(workflow_id).map(|(_, handle)| handle);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("workflow {workflow_id} task panicked: {e}");
            }
        }
    }
}

#[async_trait]
impl WorkflowEngine for InProcessWorkflowEngine {
    async fn submit(&self, workflow_id: &str, params: TaskParams) -> WorkflowResult<()> {
        {
            let entry = self.running.get(workflow_id);
            if let Some(handle) = entry {
                if !handle.is_finished() {
                    debug!("workflow {workflow_id} already live; ignoring resubmission");
                    return Ok(());
                }
            }
        }

        let memo = self
            .memos
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone();
        let ctx = StepContext::new(workflow_id, memo);
        let executor = self.executor.clone();
        let telemetry = self.telemetry.clone();
        let id = workflow_id.to_string();

        let handle = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let mut event =
                WorkflowEvent::new(id.clone(), params.run_id.clone(), params.session_id.clone());
            match executor.execute(&ctx, &params).await {
                Ok(result) => {
                    info!("workflow {id} finished (success: {})", result.success);
                    event.metadata = Some(serde_json::json!({ "success": result.success }));
                }
                Err(err) => {
                    warn!("workflow {id} failed in {}: {err}", err.phase());
                    event.outcome = "error";
                    event.error = Some(WorkflowErrorInfo {
                        phase: err.phase().to_string(),
                        message: err.to_string(),
                    });
                }
            }
            event.duration_ms = started.elapsed().as_millis() as u64;
            telemetry.emit_workflow(event);
        });

        self.running.insert(workflow_id.to_string(), handle);
        Ok(())
    }
}
