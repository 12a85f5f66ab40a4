//! Advisory per-execution file locks with stale-lock reclamation.
//!
//! A lock is a file `<locks_dir>/<execution_id>.lock` holding the owner's pid
//! and acquisition time. Acquisition fails while a live lock exists; a lock
//! whose owner is dead or whose age exceeds the TTL is reclaimed by writing a
//! fresh lock to a temp file and renaming it over the stale one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Owning process id.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

/// Lock acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("execution {execution_id} is locked by pid {pid}")]
    Held {
        /// The locked execution.
        execution_id: Uuid,
        /// Owning process.
        pid: u32,
    },
    /// Lock file I/O failed.
    #[error("lock I/O error on '{path}': {source}")]
    Io {
        /// Lock file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Lock file contents could not be parsed.
    #[error("malformed lock file '{path}': {source}")]
    Malformed {
        /// Lock file involved.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl LockError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Held advisory lock; released on [`ExecutionLock::release`] or drop.
#[derive(Debug)]
pub struct ExecutionLock {
    path: PathBuf,
    execution_id: Uuid,
    released: bool,
}

impl ExecutionLock {
    /// Acquire the lock for `execution_id`, reclaiming a stale one if found.
    pub async fn acquire(
        locks_dir: &Path,
        execution_id: Uuid,
        ttl: Duration,
    ) -> Result<Self, LockError> {
        tokio::fs::create_dir_all(locks_dir)
            .await
            .map_err(|e| LockError::io(locks_dir, e))?;

        let path = locks_dir.join(format!("{execution_id}.lock"));
        let info = LockInfo { pid: std::process::id(), acquired_at: Utc::now() };
        let bytes = serde_json::to_vec(&info).expect("lock info serialization is infallible");

        // Fast path: exclusive creation.
        match tokio::fs::OpenOptions::new().create_new(true).write(true).open(&path).await {
            Ok(file) => {
                write_and_sync(file, &bytes, &path).await?;
                debug!(%execution_id, "acquired execution lock");
                return Ok(Self { path, execution_id, released: false });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(LockError::io(&path, e)),
        }

        // A lock exists: stale or live?
        let existing = tokio::fs::read(&path).await.map_err(|e| LockError::io(&path, e))?;
        let holder: LockInfo = serde_json::from_slice(&existing)
            .map_err(|source| LockError::Malformed { path: path.clone(), source })?;

        let age = Utc::now()
            .signed_duration_since(holder.acquired_at)
            .to_std()
            .unwrap_or_default();
        if pid_alive(holder.pid) && age < ttl {
            return Err(LockError::Held { execution_id, pid: holder.pid });
        }

        // Stale: swap in a fresh lock atomically.
        warn!(%execution_id, stale_pid = holder.pid, "reclaiming stale execution lock");
        let temp = path.with_extension("lock.tmp");
        tokio::fs::write(&temp, &bytes).await.map_err(|e| LockError::io(&temp, e))?;
        tokio::fs::rename(&temp, &path).await.map_err(|e| LockError::io(&path, e))?;
        Ok(Self { path, execution_id, released: false })
    }

    /// Execution this lock protects.
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Release the lock explicitly.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
            }
        }
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        if !self.released {
            // Best effort; a leaked file is reclaimed as stale later.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_and_sync(
    mut file: tokio::fs::File,
    bytes: &[u8],
    path: &Path,
) -> Result<(), LockError> {
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes).await.map_err(|e| LockError::io(path, e))?;
    file.sync_all().await.map_err(|e| LockError::io(path, e))?;
    Ok(())
}

/// Whether `pid` refers to a live process. Where liveness cannot be observed
/// the holder is assumed alive and only the TTL reclaims the lock.
fn pid_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.exists() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}
