//! Persistent idempotency index: caller key → execution id.
//!
//! The index lives in one JSON file and is updated with the shared atomic
//! write (temp file + fsync + rename + dir fsync), so a crash never leaves a
//! half-written mapping. A hit returns the existing execution id and no new
//! execution begins.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use intentusnet_hash::hash_value;
use intentusnet_types::IntentEnvelope;
use intentusnet_wal::atomic_write;

/// Index errors.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Index file I/O failed.
    #[error("idempotency index I/O error on '{path}': {source}")]
    Io {
        /// Index file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Index file contents could not be parsed.
    #[error("malformed idempotency index: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The shared atomic write failed.
    #[error(transparent)]
    Wal(#[from] intentusnet_wal::WalError),
}

/// Key → execution id mapping, persisted on every insert.
pub struct IdempotencyIndex {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Uuid>>,
}

impl IdempotencyIndex {
    /// Load the index from `path`, starting empty when absent.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, IdempotencyError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(IdempotencyError::Io { path, source: e }),
        };
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    /// Execution id previously bound to `key`.
    pub async fn get(&self, key: &str) -> Option<Uuid> {
        self.entries.read().await.get(key).copied()
    }

    /// Bind `key` to `execution_id` and persist the index durably.
    ///
    /// The write happens under the map's write lock: read-modify-write is
    /// atomic within this process, and the file rename keeps it atomic on
    /// disk.
    pub async fn insert(&self, key: &str, execution_id: Uuid) -> Result<(), IdempotencyError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), execution_id);
        let bytes = serde_json::to_vec_pretty(&*entries)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IdempotencyError::Io { path: parent.to_path_buf(), source: e })?;
        }
        atomic_write(&self.path, &bytes).await?;
        debug!(key, %execution_id, "idempotency mapping persisted");
        Ok(())
    }

    /// Number of stored mappings.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index holds no mappings.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Derive a deterministic idempotency key from an envelope: the canonical
/// hash of the envelope minus `routingMetadata` and `metadata.traceId`.
pub fn derive_key(envelope: &IntentEnvelope) -> String {
    let mut tree = serde_json::to_value(envelope).expect("envelope serialization is infallible");
    if let Some(map) = tree.as_object_mut() {
        map.remove("routingMetadata");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            metadata.remove("traceId");
        }
    }
    hash_value(&tree)
}
