//! Run persistence over the object store.
//!
//! Records live at `runs/{id}.json`; the index is global (no per-session
//! sharding) at `runs/_index.json`. Upserts write the record first, index
//! second. The cascade delete removes index rows first so listings stop
//! showing runs whose records are about to disappear.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

use crate::storage::{
    decode_json, encode_json, keys, update_index, ObjectStore, Precondition, StorageError,
    StorageResult,
};

use super::models::{Run, RunCompletion, RunFilter, RunIndex, RunIndexEntry, RunStatus};

/// One page of run index entries. `total` counts the filtered set before
/// the limit was applied.
#[derive(Debug, Clone)]
pub struct RunPage {
    pub entries: Vec<RunIndexEntry>,
    pub total: usize,
}

/// Store for run records and the global run index.
#[derive(Clone)]
pub struct RunStore {
    store: Arc<dyn ObjectStore>,
}

impl RunStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn get_run(&self, run_id: &str) -> StorageResult<Option<Run>> {
        let key = keys::run(run_id);
        let Some(obj) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let run: Run = decode_json(&key, &obj.bytes)?;
        run.validate()
            .map_err(|cause| StorageError::read(format!("{key}: {cause}")))?;
        Ok(Some(run))
    }

    /// Write a run record, then upsert its index entry.
    pub async fn put_run(&self, run: &Run) -> StorageResult<()> {
        let key = keys::run(&run.run_id);
        run.validate()
            .map_err(|cause| StorageError::write(format!("{key}: {cause}")))?;

        let bytes = encode_json(&key, run)?;
        self.store
            .put(&key, bytes, Precondition::None)
            .await?
            .ok_or_else(|| StorageError::write(format!("{key}: unconditional put rejected")))?;

        self.upsert_index_entry(run.index_entry()).await
    }

    /// Terminal transition: move a run to `completed` or `failed` and attach
    /// its result. Already-terminal runs are left untouched.
    pub async fn complete_run(&self, run_id: &str, completion: RunCompletion) -> StorageResult<Run> {
        let mut run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| StorageError::read("Run not found".to_string()))?;

        if run.status.is_terminal() {
            debug!("run {run_id} already terminal ({}); skipping", run.status);
            return Ok(run);
        }

        run.status = if completion.success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        run.completed_at = Some(Utc::now().timestamp_millis());
        if let Some(title) = completion.title {
            run.title = title;
        }
        run.result = Some(super::models::RunResult {
            success: completion.success,
            output: completion.output.unwrap_or_default(),
            error: completion.error,
        });

        self.put_run(&run).await?;
        Ok(run)
    }

    /// List runs from the global index, newest first, applying every
    /// supplied filter.
    pub async fn list_runs(&self, filter: &RunFilter) -> StorageResult<RunPage> {
        let index = self.read_index().await?;
        let mut entries: Vec<RunIndexEntry> = index
            .runs
            .into_values()
            .filter(|entry| filter.matches(entry))
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let total = entries.len();
        let limit = filter.limit.unwrap_or(100);
        entries.truncate(limit);
        Ok(RunPage { entries, total })
    }

    /// Delete a single run record, then drop its index entry. Index-first
    /// ordering is reserved for the session cascade; here a crash between
    /// the two steps leaves at worst a stale index row, cleared by the
    /// index update on the next attempt.
    pub async fn delete_run(&self, run_id: &str) -> StorageResult<()> {
        self.store.delete(&keys::run(run_id)).await?;

        let id = run_id.to_string();
        update_index(
            self.store.as_ref(),
            keys::RUN_INDEX,
            RunIndex::empty,
            move |index: &mut RunIndex| {
                index.runs.remove(&id);
                index.updated_at = Utc::now().timestamp_millis();
            },
        )
        .await
    }

    /// Cascade delete for external session deletion: drop all of a
    /// session's rows from the index first, then best-effort delete the
    /// underlying records.
    pub async fn delete_runs_for_session(&self, session_id: &str) -> StorageResult<usize> {
        let index = self.read_index().await?;
        let doomed: Vec<String> = index
            .runs
            .values()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.run_id.clone())
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let ids = doomed.clone();
        let session = session_id.to_string();
        update_index(
            self.store.as_ref(),
            keys::RUN_INDEX,
            RunIndex::empty,
            move |index: &mut RunIndex| {
                index.runs.retain(|_, entry| entry.session_id != session);
                index.updated_at = Utc::now().timestamp_millis();
            },
        )
        .await?;

        for run_id in &ids {
            if let Err(e) = self.store.delete(&keys::run(run_id)).await {
                warn!("failed to delete run record {run_id}: {e}");
            }
        }
        Ok(ids.len())
    }

    async fn upsert_index_entry(&self, entry: RunIndexEntry) -> StorageResult<()> {
        let id = entry.run_id.clone();
        update_index(
            self.store.as_ref(),
            keys::RUN_INDEX,
            RunIndex::empty,
            move |index: &mut RunIndex| {
                index.runs.insert(id.clone(), entry.clone());
                index.updated_at = Utc::now().timestamp_millis();
            },
        )
        .await
    }

    async fn read_index(&self) -> StorageResult<RunIndex> {
        match self.store.get(keys::RUN_INDEX).await? {
            Some(obj) => decode_json(keys::RUN_INDEX, &obj.bytes),
            None => Ok(RunIndex::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::models::tests::sample_run;
    use super::*;
    use crate::storage::MemoryStore;

    fn test_store() -> RunStore {
        RunStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = test_store();
        store.put_run(&sample_run("run-1", "sess", 100)).await.unwrap();
        let run = store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
    }

    #[tokio::test]
    async fn test_complete_run_success() {
        let store = test_store();
        store.put_run(&sample_run("run-1", "sess", 100)).await.unwrap();

        let run = store
            .complete_run(
                "run-1",
                RunCompletion {
                    success: true,
                    output: Some("done".to_string()),
                    error: None,
                    title: Some("better title".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.unwrap() > 0);
        assert_eq!(run.title, "better title");
        assert_eq!(run.result.as_ref().unwrap().output, "done");

        let entry = &store.list_runs(&RunFilter::default()).await.unwrap().entries[0];
        assert_eq!(entry.status, RunStatus::Completed);
        assert_eq!(entry.completed_at, run.completed_at);
        assert_eq!(entry.title, "better title");
    }

    #[tokio::test]
    async fn test_complete_run_failure_keeps_title() {
        let store = test_store();
        store.put_run(&sample_run("run-1", "sess", 100)).await.unwrap();

        let run = store
            .complete_run(
                "run-1",
                RunCompletion {
                    success: false,
                    output: None,
                    error: Some("agent crashed".to_string()),
                    title: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.title, "Add README");
        assert_eq!(run.result.as_ref().unwrap().output, "");
        assert_eq!(run.result.as_ref().unwrap().error.as_deref(), Some("agent crashed"));
    }

    #[tokio::test]
    async fn test_complete_run_missing() {
        let store = test_store();
        let err = store
            .complete_run("run-missing", RunCompletion::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Run not found"));
    }

    #[tokio::test]
    async fn test_complete_run_terminal_is_noop() {
        let store = test_store();
        store.put_run(&sample_run("run-1", "sess", 100)).await.unwrap();
        store
            .complete_run(
                "run-1",
                RunCompletion {
                    success: true,
                    output: Some("first".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let again = store
            .complete_run(
                "run-1",
                RunCompletion {
                    success: false,
                    error: Some("late failure".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::Completed);
        assert_eq!(again.result.as_ref().unwrap().output, "first");
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let store = test_store();
        let mut a = sample_run("run-a", "sess-1", 100);
        a.status = RunStatus::Completed;
        a.completed_at = Some(150);
        let mut b = sample_run("run-b", "sess-1", 200);
        b.status = RunStatus::Failed;
        b.completed_at = Some(250);
        let mut c = sample_run("run-c", "sess-2", 300);
        c.status = RunStatus::Completed;
        c.completed_at = Some(350);
        for run in [&a, &b, &c] {
            store.put_run(run).await.unwrap();
        }

        let completed = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.total, 2);
        assert_eq!(completed.entries[0].run_id, "run-c");
        assert_eq!(completed.entries[1].run_id, "run-a");

        let limited = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Completed),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.total, 2);
        assert_eq!(limited.entries.len(), 1);
        assert_eq!(limited.entries[0].run_id, "run-c");

        let before = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Completed),
                before: Some(300),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(before.total, 1);
        assert_eq!(before.entries[0].run_id, "run-a");
    }

    #[tokio::test]
    async fn test_cascade_delete_scoped_to_session() {
        let store = test_store();
        store.put_run(&sample_run("run-a", "sess-1", 100)).await.unwrap();
        store.put_run(&sample_run("run-b", "sess-1", 200)).await.unwrap();
        store.put_run(&sample_run("run-c", "sess-2", 300)).await.unwrap();

        let deleted = store.delete_runs_for_session("sess-1").await.unwrap();
        assert_eq!(deleted, 2);

        let sess1 = store
            .list_runs(&RunFilter {
                session_id: Some("sess-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sess1.total, 0);

        let sess2 = store
            .list_runs(&RunFilter {
                session_id: Some("sess-2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sess2.total, 1);
        assert!(store.get_run("run-a").await.unwrap().is_none());
        assert!(store.get_run("run-c").await.unwrap().is_some());
    }
}
