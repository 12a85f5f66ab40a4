//! Execution record model and incremental builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use intentusnet_hash::hash_value;
use intentusnet_types::{AgentResponse, IntentRef, SideEffectClass};
use intentusnet_wal::{WalEntry, WalEntryKind};

use crate::{RecorderError, RecorderResult};

//─────────────────────────────
//  Record events
//─────────────────────────────

/// One journaled transition mirrored into the record.
///
/// Events carry the deterministic projection of a WAL entry: sequence, kind
/// and the step fields, but no timestamps, so records from two identical runs
/// compare equal event by event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvent {
    /// WAL sequence number this event mirrors.
    pub seq: u64,
    /// WAL entry kind.
    #[serde(rename = "entryType")]
    pub kind: WalEntryKind,
    /// Step identifier, for step-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Serving agent, for step-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Side-effect class declared at `step.started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<SideEffectClass>,
    /// Input hash recorded at `step.started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    /// Output hash recorded at `step.completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
}

impl RecordEvent {
    fn from_wal_entry(entry: &WalEntry) -> Self {
        let payload = &entry.payload;
        let side_effect = payload
            .get("sideEffect")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        Self {
            seq: entry.seq,
            kind: entry.kind,
            step_id: payload.get("stepId").and_then(Value::as_str).map(String::from),
            agent: payload.get("agent").and_then(Value::as_str).map(String::from),
            side_effect,
            input_hash: payload.get("inputHash").and_then(Value::as_str).map(String::from),
            output_hash: payload.get("outputHash").and_then(Value::as_str).map(String::from),
        }
    }
}

//─────────────────────────────
//  Execution record
//─────────────────────────────

/// Immutable artifact summarizing one completed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Execution this record summarizes.
    pub execution_id: Uuid,
    /// Content hash of the submitted envelope.
    pub envelope_hash: String,
    /// Routed intent.
    pub intent: IntentRef,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution finished; `None` until finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Ordered journal projection.
    pub events: Vec<RecordEvent>,
    /// Final response returned to the caller.
    pub response: AgentResponse,
    /// SHA-256 of the canonical record excluding this field.
    pub record_hash: String,
    /// Whether the record is finalized and immutable.
    pub finalized: bool,
    /// Whether the execution can be deterministically replayed.
    pub replayable: bool,
}

impl ExecutionRecord {
    /// Compute the record's content hash: canonical record minus `recordHash`.
    pub fn computed_hash(&self) -> RecorderResult<String> {
        let mut tree = serde_json::to_value(self)?;
        if let Some(map) = tree.as_object_mut() {
            map.remove("recordHash");
        }
        Ok(hash_value(&tree))
    }

    /// Verify the stored hash against the record's content.
    pub fn verify_hash(&self) -> RecorderResult<()> {
        let computed = self.computed_hash()?;
        if computed != self.record_hash {
            return Err(RecorderError::consistency(
                self.execution_id,
                format!("recordHash mismatch: stored {} != computed {computed}", self.record_hash),
            ));
        }
        Ok(())
    }

    /// Step ids of every `step.completed` event.
    pub fn completed_step_ids(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.kind == WalEntryKind::StepCompleted)
            .filter_map(|e| e.step_id.as_deref())
            .collect()
    }
}

//─────────────────────────────
//  Builder
//─────────────────────────────

/// Accumulates a record while an execution is in flight.
#[derive(Debug)]
pub struct RecordBuilder {
    execution_id: Uuid,
    envelope_hash: String,
    intent: IntentRef,
    started_at: DateTime<Utc>,
    events: Vec<RecordEvent>,
    finalized: bool,
}

impl RecordBuilder {
    /// Start recording an execution.
    pub fn new(execution_id: Uuid, envelope_hash: impl Into<String>, intent: IntentRef) -> Self {
        Self {
            execution_id,
            envelope_hash: envelope_hash.into(),
            intent,
            started_at: Utc::now(),
            events: Vec::new(),
            finalized: false,
        }
    }

    /// Mirror one WAL entry into the record. Called alongside every append.
    pub fn observe(&mut self, entry: &WalEntry) -> RecorderResult<()> {
        if self.finalized {
            return Err(RecorderError::Finalized(self.execution_id));
        }
        self.events.push(RecordEvent::from_wal_entry(entry));
        Ok(())
    }

    /// Finalize into an immutable record with a computed content hash.
    pub fn finalize(
        mut self,
        response: AgentResponse,
        replayable: bool,
    ) -> RecorderResult<ExecutionRecord> {
        self.finalized = true;
        let mut record = ExecutionRecord {
            execution_id: self.execution_id,
            envelope_hash: self.envelope_hash,
            intent: self.intent,
            started_at: self.started_at,
            finished_at: Some(Utc::now()),
            events: self.events,
            response,
            record_hash: String::new(),
            finalized: true,
            replayable,
        };
        record.record_hash = record.computed_hash()?;
        Ok(record)
    }
}
