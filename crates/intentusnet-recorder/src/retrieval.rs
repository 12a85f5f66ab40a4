//! Historical retrieval: stored responses by execution id, verified, with no
//! agent execution.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use intentusnet_hash::KeyRegistry;
use intentusnet_types::AgentResponse;
use intentusnet_wal::{wal_path, WalEntryKind, WalReader};

use crate::record::ExecutionRecord;
use crate::store::RecordStore;
use crate::{RecorderError, RecorderResult};

/// Pure lookup over records and their WALs.
#[derive(Debug, Clone)]
pub struct RetrievalEngine {
    records: RecordStore,
    wal_dir: PathBuf,
}

impl RetrievalEngine {
    /// Engine reading records from `records` and WALs from `wal_dir`.
    pub fn new(records: RecordStore, wal_dir: impl Into<PathBuf>) -> Self {
        Self { records, wal_dir: wal_dir.into() }
    }

    /// Return the stored response for `execution_id`.
    ///
    /// The record hash is verified, then the record is cross-checked against
    /// its WAL: the envelope hashes must agree and every completed step in
    /// the WAL must have exactly one event in the record (and vice versa).
    /// Any inconsistency raises a `consistency_violation`; no agent runs.
    pub async fn retrieve(
        &self,
        execution_id: Uuid,
        keys: Option<&KeyRegistry>,
    ) -> RecorderResult<AgentResponse> {
        let record = self.verify_record(execution_id, keys).await?;
        debug!(%execution_id, "retrieval served from stored record");
        Ok(record.response)
    }

    /// Load and fully cross-check a record without returning the response.
    pub async fn verify_record(
        &self,
        execution_id: Uuid,
        keys: Option<&KeyRegistry>,
    ) -> RecorderResult<ExecutionRecord> {
        let record = self.records.load(execution_id).await?;
        record.verify_hash()?;

        let wal = WalReader::verify(&wal_path(&self.wal_dir, execution_id), keys).await?;

        // Envelope hash recorded at execution.started must match the record.
        let started = wal.first_of(WalEntryKind::ExecutionStarted).ok_or_else(|| {
            RecorderError::consistency(execution_id, "WAL has no execution.started entry")
        })?;
        let wal_envelope_hash = started
            .payload
            .get("envelopeHash")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if wal_envelope_hash != record.envelope_hash {
            return Err(RecorderError::consistency(
                execution_id,
                "envelope hash differs between record and WAL",
            ));
        }

        // Completed steps must match one-to-one in both directions.
        let wal_completed: HashSet<String> = wal
            .entries
            .iter()
            .filter(|e| e.kind == WalEntryKind::StepCompleted)
            .filter_map(|e| e.payload.get("stepId").and_then(serde_json::Value::as_str))
            .map(String::from)
            .collect();
        let record_completed: HashSet<String> =
            record.completed_step_ids().iter().map(|s| s.to_string()).collect();

        if let Some(missing) = wal_completed.difference(&record_completed).next() {
            return Err(RecorderError::consistency(
                execution_id,
                format!("completed step '{missing}' present in WAL but absent from record"),
            ));
        }
        if let Some(extra) = record_completed.difference(&wal_completed).next() {
            return Err(RecorderError::consistency(
                execution_id,
                format!("record event for step '{extra}' has no completed WAL step"),
            ));
        }

        Ok(record)
    }
}
