//! Durable record storage: one JSON file per execution, written atomically.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use intentusnet_wal::atomic_write;

use crate::record::ExecutionRecord;
use crate::{RecorderError, RecorderResult};

/// Stores finalized execution records under one directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for `execution_id`.
    pub fn path_for(&self, execution_id: Uuid) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }

    /// Persist a finalized record atomically (temp file + rename + dir fsync).
    pub async fn save(&self, record: &ExecutionRecord) -> RecorderResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RecorderError::io(&self.dir, e))?;
        let path = self.path_for(record.execution_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        atomic_write(&path, &bytes).await?;
        debug!(execution_id = %record.execution_id, path = %path.display(), "persisted record");
        Ok(())
    }

    /// Load a record by execution id.
    pub async fn load(&self, execution_id: Uuid) -> RecorderResult<ExecutionRecord> {
        let path = self.path_for(execution_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecorderError::NotFound(execution_id));
            }
            Err(e) => return Err(RecorderError::io(&path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a record exists for `execution_id`.
    pub async fn exists(&self, execution_id: Uuid) -> bool {
        fs::try_exists(self.path_for(execution_id)).await.unwrap_or(false)
    }

    /// Execution ids of every stored record, sorted for stable output.
    pub async fn list(&self) -> RecorderResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(RecorderError::io(&self.dir, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| RecorderError::io(&self.dir, e))? {
            let path = entry.path();
            if let Some(stem) = path.file_name().and_then(|f| f.to_str()).and_then(|f| f.strip_suffix(".json")) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
