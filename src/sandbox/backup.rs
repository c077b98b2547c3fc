//! Agent-state backup and restore.
//!
//! The agent subprocess keeps its own session history under its storage
//! directory. On activation a missing directory is restored from the last
//! snapshot; after every run the directory is snapshotted back to the
//! object store. Backup is advisory: failures are logged and swallowed,
//! never surfaced to the run.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};

use crate::storage::{keys, ObjectStore, Precondition};

use super::error::SandboxResult;
use super::prepare::{AGENT_STATE_DIR, AGENT_STORAGE_DIR};
use super::runtime::{ExecRequest, SandboxRuntime};

/// Payloads above this size move through chunked base64 exec rather than a
/// single file write.
pub const CHUNKED_UPLOAD_THRESHOLD: usize = 100 * 1024;

/// Bytes of raw payload per chunk command. A multiple of 3 so the
/// concatenated base64 stream decodes as one document.
const CHUNK_SIZE: usize = 63 * 1024;

const RESTORE_ARCHIVE: &str = "/tmp/opencode-restore.tar.gz";
const RESTORE_B64: &str = "/tmp/opencode-restore.b64";
const BACKUP_ARCHIVE: &str = "/tmp/opencode-backup.tar.gz";

/// Restore the agent storage directory from `sessions/{id}/opencode-storage.tar.gz`.
/// Returns whether a restore happened.
pub async fn restore_backup(
    runtime: &dyn SandboxRuntime,
    store: &dyn ObjectStore,
    sandbox_id: &str,
    session_id: &str,
) -> SandboxResult<bool> {
    let key = keys::agent_backup(session_id);
    let Some(archive) = store.get(&key).await.ok().flatten() else {
        debug!("no agent backup at {key}");
        return Ok(false);
    };

    upload_archive(runtime, sandbox_id, &archive.bytes).await?;

    let command = format!(
        "mkdir -p {AGENT_STATE_DIR} && tar -xzf {RESTORE_ARCHIVE} -C {AGENT_STATE_DIR} && \
         rm -f {RESTORE_ARCHIVE}"
    );
    runtime
        .exec(sandbox_id, ExecRequest::shell(command.clone()))
        .await?
        .check(&command)?;

    info!(
        "restored agent state for session {session_id} ({} bytes)",
        archive.bytes.len()
    );
    Ok(true)
}

async fn upload_archive(
    runtime: &dyn SandboxRuntime,
    sandbox_id: &str,
    bytes: &[u8],
) -> SandboxResult<()> {
    if bytes.len() <= CHUNKED_UPLOAD_THRESHOLD {
        return runtime.write_file(sandbox_id, RESTORE_ARCHIVE, bytes).await;
    }

    runtime
        .exec(sandbox_id, ExecRequest::shell(format!("rm -f {RESTORE_B64}")))
        .await?;
    for chunk in bytes.chunks(CHUNK_SIZE) {
        let encoded = BASE64.encode(chunk);
        let command = format!("printf %s '{encoded}' >> {RESTORE_B64}");
        runtime
            .exec(sandbox_id, ExecRequest::shell(command))
            .await?
            .check("append backup chunk")?;
    }
    let command =
        format!("base64 -d {RESTORE_B64} > {RESTORE_ARCHIVE} && rm -f {RESTORE_B64}");
    runtime
        .exec(sandbox_id, ExecRequest::shell(command.clone()))
        .await?
        .check(&command)?;
    Ok(())
}

/// Snapshot the agent storage directory to the object store. All failures
/// are swallowed; returns whether a snapshot was uploaded.
pub async fn backup_session(
    runtime: &dyn SandboxRuntime,
    store: &dyn ObjectStore,
    sandbox_id: &str,
    session_id: &str,
) -> bool {
    match try_backup(runtime, store, sandbox_id, session_id).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            warn!("backup for session {session_id} failed: {e}");
            false
        }
    }
}

async fn try_backup(
    runtime: &dyn SandboxRuntime,
    store: &dyn ObjectStore,
    sandbox_id: &str,
    session_id: &str,
) -> SandboxResult<bool> {
    let check = runtime
        .exec(
            sandbox_id,
            ExecRequest::shell(format!("test -d {AGENT_STORAGE_DIR}")),
        )
        .await?;
    if !check.success() {
        debug!("no agent storage to back up for session {session_id}");
        return Ok(false);
    }

    let command = format!("tar -czf {BACKUP_ARCHIVE} -C {AGENT_STATE_DIR} storage");
    runtime
        .exec(sandbox_id, ExecRequest::shell(command.clone()))
        .await?
        .check(&command)?;

    let Some(bytes) = runtime.read_file(sandbox_id, BACKUP_ARCHIVE).await? else {
        return Ok(false);
    };

    let key = keys::agent_backup(session_id);
    let size = bytes.len();
    store
        .put(&key, bytes, Precondition::None)
        .await
        .map_err(|e| super::error::SandboxError::Api {
            status: 0,
            message: format!("uploading {key}: {e}"),
        })?;

    runtime
        .exec(sandbox_id, ExecRequest::shell(format!("rm -f {BACKUP_ARCHIVE}")))
        .await?;

    info!("backed up agent state for session {session_id} ({size} bytes)");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::ScriptedSandbox;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_backup_then_restore_roundtrip() {
        let sandbox = ScriptedSandbox::new();
        sandbox.add_dir(AGENT_STORAGE_DIR);
        let store = MemoryStore::new();

        let uploaded = backup_session(&sandbox, &store, "sb", "ab12cd34").await;
        assert!(uploaded);
        assert!(store
            .get(&keys::agent_backup("ab12cd34"))
            .await
            .unwrap()
            .is_some());
        // Temp archive cleaned up.
        assert!(sandbox.file_string(BACKUP_ARCHIVE).is_none());

        // A fresh sandbox restores from that snapshot.
        let fresh = ScriptedSandbox::new();
        let restored = restore_backup(&fresh, &store, "sb", "ab12cd34").await.unwrap();
        assert!(restored);
        assert!(fresh.has_dir(AGENT_STORAGE_DIR));
        assert!(fresh.file_string(RESTORE_ARCHIVE).is_none());
    }

    #[tokio::test]
    async fn test_backup_without_state_is_noop() {
        let sandbox = ScriptedSandbox::new();
        let store = MemoryStore::new();
        let uploaded = backup_session(&sandbox, &store, "sb", "ab12cd34").await;
        assert!(!uploaded);
    }

    #[tokio::test]
    async fn test_restore_without_backup_is_noop() {
        let sandbox = ScriptedSandbox::new();
        let store = MemoryStore::new();
        let restored = restore_backup(&sandbox, &store, "sb", "ab12cd34").await.unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn test_large_backup_goes_through_chunked_upload() {
        let sandbox = ScriptedSandbox::new();
        let store = MemoryStore::new();
        let big = vec![7u8; CHUNKED_UPLOAD_THRESHOLD + 1];
        store
            .put(
                &keys::agent_backup("ab12cd34"),
                big.clone(),
                crate::storage::Precondition::None,
            )
            .await
            .unwrap();

        let restored = restore_backup(&sandbox, &store, "sb", "ab12cd34").await.unwrap();
        assert!(restored);
        assert!(sandbox.ran_command_containing("base64 -d"));
        assert!(sandbox.has_dir(AGENT_STORAGE_DIR));
    }
}
