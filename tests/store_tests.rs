//! Index consistency and concurrency tests over the object store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sandbox_mcp::run::{Run, RunFilter, RunStatus, RunStore};
use sandbox_mcp::session::{Session, SessionConfig, SessionStatus, SessionStore};
use sandbox_mcp::storage::{
    keys, Etag, Listing, MemoryStore, ObjectStore, Precondition, StorageError, StorageResult,
    StoredObject,
};

fn session(id: &str, last_activity: i64) -> Session {
    Session {
        session_id: id.to_string(),
        sandbox_id: id.to_string(),
        created_at: last_activity,
        last_activity,
        status: SessionStatus::Active,
        workspace_path: "/workspace".to_string(),
        web_ui_url: format!("http://127.0.0.1:8787/session/{id}/"),
        repository: None,
        title: None,
        config: SessionConfig {
            default_model: "claude-sonnet-4-5".to_string(),
        },
        opencode_session_id: None,
        cloned_repos: None,
    }
}

fn run(id: &str, session_id: &str, started_at: i64, status: RunStatus) -> Run {
    Run {
        run_id: id.to_string(),
        session_id: session_id.to_string(),
        workflow_id: id.to_string(),
        status,
        task: "task".to_string(),
        title: format!("run {id}"),
        model: "claude-sonnet-4-5".to_string(),
        started_at,
        completed_at: status.is_terminal().then_some(started_at + 50),
        result: None,
    }
}

/// Index consistency: after any sequence of puts and deletes, an index row
/// exists exactly when the record exists, with agreeing projections.
#[tokio::test]
async fn test_session_index_matches_records() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sessions = SessionStore::new(store.clone());

    for (id, activity) in [("aa000001", 10), ("aa000002", 20), ("aa000003", 30)] {
        sessions.put_session(&session(id, activity)).await.unwrap();
    }
    sessions.delete_session("aa000002").await.unwrap();

    let page = sessions.list_sessions(100, 0).await.unwrap();
    assert_eq!(page.total, 2);
    for entry in &page.entries {
        let record = sessions
            .get_session(&entry.session_id)
            .await
            .unwrap()
            .expect("index row without record");
        assert_eq!(record.status, entry.status);
        assert_eq!(record.created_at, entry.created_at);
        assert_eq!(record.last_activity, entry.last_activity);
    }
    assert!(store
        .get(&keys::session("aa000002"))
        .await
        .unwrap()
        .is_none());
}

/// Conditional-write convergence: N concurrent writers against distinct
/// ids all land in the shared index.
#[tokio::test]
async fn test_concurrent_session_puts_converge() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sessions = SessionStore::new(store.clone());

    // Start from a populated index.
    sessions.put_session(&session("aa000000", 1)).await.unwrap();

    let mut handles = Vec::new();
    for i in 1..=12u32 {
        let sessions = sessions.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("bb{:06}", i);
            sessions.put_session(&session(&id, i as i64)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let page = sessions.list_sessions(100, 0).await.unwrap();
    assert_eq!(page.total, 13);
}

/// Run index consistency including filter fidelity.
#[tokio::test]
async fn test_run_index_filter_fidelity() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let runs = RunStore::new(store);

    runs.put_run(&run("run-a1", "sess-x", 100, RunStatus::Completed))
        .await
        .unwrap();
    runs.put_run(&run("run-a2", "sess-x", 200, RunStatus::Started))
        .await
        .unwrap();
    runs.put_run(&run("run-b1", "sess-y", 300, RunStatus::Completed))
        .await
        .unwrap();

    let for_x = runs
        .list_runs(&RunFilter {
            session_id: Some("sess-x".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_x.total, 2);
    assert!(for_x.entries.iter().all(|e| e.session_id == "sess-x"));
    // Sorted descending by startedAt.
    assert_eq!(for_x.entries[0].run_id, "run-a2");
    assert_eq!(for_x.entries[1].run_id, "run-a1");

    for entry in &for_x.entries {
        let record = runs.get_run(&entry.run_id).await.unwrap().unwrap();
        assert_eq!(record.session_id, entry.session_id);
        assert_eq!(record.status, entry.status);
        assert_eq!(record.title, entry.title);
        assert_eq!(record.started_at, entry.started_at);
        assert_eq!(record.completed_at, entry.completed_at);
    }
}

/// Concurrent writers on the global run index converge.
#[tokio::test]
async fn test_concurrent_run_puts_converge() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let runs = RunStore::new(store);

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let runs = runs.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("run-{:08x}", i);
            runs.put_run(&run(&id, "sess", i as i64, RunStatus::Started))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let page = runs.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(page.total, 16);
}

/// Cascade delete removes exactly one session's runs and leaves the rest
/// untouched.
#[tokio::test]
async fn test_cascade_delete_correctness() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let runs = RunStore::new(store.clone());

    runs.put_run(&run("run-x1", "sess-x", 100, RunStatus::Completed))
        .await
        .unwrap();
    runs.put_run(&run("run-x2", "sess-x", 200, RunStatus::Failed))
        .await
        .unwrap();
    runs.put_run(&run("run-y1", "sess-y", 300, RunStatus::Started))
        .await
        .unwrap();

    let before = runs
        .list_runs(&RunFilter {
            session_id: Some("sess-y".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    runs.delete_runs_for_session("sess-x").await.unwrap();

    let for_x = runs
        .list_runs(&RunFilter {
            session_id: Some("sess-x".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_x.total, 0);
    assert!(store.get(&keys::run("run-x1")).await.unwrap().is_none());

    let after = runs
        .list_runs(&RunFilter {
            session_id: Some("sess-y".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(after.total, before.total);
    assert_eq!(after.entries[0].run_id, before.entries[0].run_id);
}

/// Deleting a single run drops both the index row and the record.
#[tokio::test]
async fn test_delete_run() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let runs = RunStore::new(store.clone());

    runs.put_run(&run("run-d1", "sess-d", 100, RunStatus::Started))
        .await
        .unwrap();
    runs.delete_run("run-d1").await.unwrap();

    assert!(runs.get_run("run-d1").await.unwrap().is_none());
    assert_eq!(runs.list_runs(&RunFilter::default()).await.unwrap().total, 0);
}

/// Store that can be told to reject writes to the run index, exposing the
/// window between a run's record delete and its index update.
struct FailingRunIndexStore {
    inner: MemoryStore,
    fail_index_writes: AtomicBool,
}

impl FailingRunIndexStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_index_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ObjectStore for FailingRunIndexStore {
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> StorageResult<Option<Etag>> {
        if key == keys::RUN_INDEX && self.fail_index_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(
                "injected run-index write failure".to_string(),
            ));
        }
        self.inner.put(key, bytes, precondition).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> StorageResult<Listing> {
        self.inner.list(prefix, limit, cursor).await
    }
}

/// Crash window in `delete_run`: the record is the first thing to
/// disappear. When the index update fails, the record is already gone and
/// only a stale index row remains, cleared by the next attempt.
#[tokio::test]
async fn test_delete_run_removes_record_before_index() {
    let store = Arc::new(FailingRunIndexStore::new());
    let runs = RunStore::new(store.clone());

    runs.put_run(&run("run-d2", "sess-d", 100, RunStatus::Started))
        .await
        .unwrap();

    store.fail_index_writes.store(true, Ordering::SeqCst);
    let err = runs.delete_run("run-d2").await.unwrap_err();
    assert!(err.to_string().contains("injected run-index write failure"));

    // The record went first; the index still carries the stale row.
    assert!(store.get(&keys::run("run-d2")).await.unwrap().is_none());
    store.fail_index_writes.store(false, Ordering::SeqCst);
    let page = runs.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].run_id, "run-d2");

    // A retried delete clears the stale row.
    runs.delete_run("run-d2").await.unwrap();
    assert_eq!(runs.list_runs(&RunFilter::default()).await.unwrap().total, 0);
}

/// Orphan records (crash between record and index write) stay readable by
/// direct key without appearing in listings.
#[tokio::test]
async fn test_orphan_record_invisible_to_listing() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let runs = RunStore::new(store.clone());

    // Simulate a crash after the record write: write the record bytes
    // directly, never touching the index.
    let orphan = run("run-orphan", "sess-z", 500, RunStatus::Started);
    store
        .put(
            &keys::run("run-orphan"),
            serde_json::to_vec(&orphan).unwrap(),
            sandbox_mcp::storage::Precondition::None,
        )
        .await
        .unwrap();

    assert!(runs.get_run("run-orphan").await.unwrap().is_some());
    let page = runs.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(page.total, 0);
}
