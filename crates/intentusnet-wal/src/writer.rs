//! The append side of the WAL.
//!
//! A writer owns its execution's file for the writer's lifetime; concurrent
//! writers to one execution are prevented by exclusive creation here and by
//! the execution lock above. Every append is flushed and fsynced before it
//! returns so the journal is durable before the corresponding side effect.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use intentusnet_hash::{hash_value, Ed25519Signer};

use crate::entry::{WalEntry, WalEntryKind, WAL_VERSION};
use crate::reader::WalReader;
use crate::{wal_path, WalError, WalResult};

/// Appends hash-chained entries to one execution's WAL file.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    execution_id: Uuid,
    next_seq: u64,
    prev_hash: Option<String>,
    signer: Option<Ed25519Signer>,
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("path", &self.path)
            .field("execution_id", &self.execution_id)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl WalWriter {
    /// Create a fresh WAL for `execution_id` under `wal_dir`.
    ///
    /// Fails with [`WalError::AlreadyExists`] if a WAL file for the execution
    /// is already present.
    pub async fn create(
        wal_dir: &Path,
        execution_id: Uuid,
        signer: Option<Ed25519Signer>,
    ) -> WalResult<Self> {
        tokio::fs::create_dir_all(wal_dir)
            .await
            .map_err(|e| WalError::io(wal_dir, e))?;

        let path = wal_path(wal_dir, execution_id);
        let file = match OpenOptions::new().create_new(true).append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WalError::AlreadyExists(execution_id));
            }
            Err(e) => return Err(WalError::io(&path, e)),
        };

        debug!(%execution_id, path = %path.display(), "created WAL");
        Ok(Self { path, file, execution_id, next_seq: 1, prev_hash: None, signer })
    }

    /// Reopen an existing WAL for appending, e.g. when recovery resumes an
    /// execution. The tail of the file is read back to restore the chain
    /// position; a torn final line is dropped by continuing after the last
    /// valid entry.
    pub async fn reopen(
        wal_dir: &Path,
        execution_id: Uuid,
        signer: Option<Ed25519Signer>,
    ) -> WalResult<Self> {
        let path = wal_path(wal_dir, execution_id);
        let outcome = WalReader::read(&path).await?;
        let (next_seq, prev_hash) = match outcome.entries.last() {
            Some(last) => (last.seq + 1, Some(last.entry_hash.clone())),
            None => (1, None),
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| WalError::io(&path, e))?;

        debug!(%execution_id, next_seq, "reopened WAL for append");
        Ok(Self { path, file, execution_id, next_seq, prev_hash, signer })
    }

    /// Execution this writer journals.
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Sequence number the next append will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry: hash-chain it, optionally sign it, write the line,
    /// flush, and fsync before returning.
    pub async fn append(&mut self, kind: WalEntryKind, payload: Value) -> WalResult<WalEntry> {
        let timestamp_iso = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let seq = self.next_seq;

        let entry_hash = hash_value(&WalEntry::hashable_value(
            seq,
            self.execution_id,
            &timestamp_iso,
            kind,
            &payload,
            self.prev_hash.as_deref(),
            WAL_VERSION,
        ));

        let mut entry = WalEntry {
            seq,
            execution_id: self.execution_id,
            timestamp_iso,
            kind,
            payload,
            prev_hash: self.prev_hash.take(),
            entry_hash,
            version: WAL_VERSION.to_string(),
            signer_key_id: None,
            signature: None,
        };

        if let Some(signer) = &self.signer {
            let signed = signer.sign(&entry.signable_bytes());
            entry.signer_key_id = Some(signed.key_id);
            entry.signature = Some(signed.signature);
        }

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .map_err(|e| WalError::io(&self.path, e))?;
        self.file.flush().await.map_err(|e| WalError::io(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| WalError::io(&self.path, e))?;

        self.next_seq += 1;
        self.prev_hash = Some(entry.entry_hash.clone());

        debug!(seq, kind = %kind, "appended WAL entry");
        Ok(entry)
    }

    /// Convenience append for typed payloads.
    pub async fn append_payload<P: serde::Serialize>(
        &mut self,
        kind: WalEntryKind,
        payload: &P,
    ) -> WalResult<WalEntry> {
        self.append(kind, serde_json::to_value(payload)?).await
    }
}
