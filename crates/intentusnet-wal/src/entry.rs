//! WAL entry model and content hashing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use intentusnet_hash::hash_value;

/// Format version stamped on every entry.
pub const WAL_VERSION: &str = "1.0";

//─────────────────────────────
//  Entry kinds
//─────────────────────────────

/// Every state transition the runtime journals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// Execution accepted; payload carries the envelope hash.
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    /// Execution finished successfully.
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    /// Execution finished with a terminal error.
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    /// Execution was aborted by an operator.
    #[serde(rename = "execution.aborted")]
    ExecutionAborted,
    /// A step (one agent attempt) is about to run. Durable before the side effect.
    #[serde(rename = "step.started")]
    StepStarted,
    /// The step's agent returned success.
    #[serde(rename = "step.completed")]
    StepCompleted,
    /// The step's agent returned or was normalized to an error.
    #[serde(rename = "step.failed")]
    StepFailed,
    /// The step was skipped (e.g. fallback stopped at an irreversible step).
    #[serde(rename = "step.skipped")]
    StepSkipped,
    /// The router advanced from one fallback candidate to the next.
    #[serde(rename = "fallback.triggered")]
    FallbackTriggered,
    /// All fallback candidates failed.
    #[serde(rename = "fallback.exhausted")]
    FallbackExhausted,
    /// Contract validation passed (records side-effect escalations).
    #[serde(rename = "contract.validated")]
    ContractValidated,
    /// A contract rule was breached at runtime.
    #[serde(rename = "contract.violated")]
    ContractViolated,
    /// Crash recovery began for this execution.
    #[serde(rename = "recovery.started")]
    RecoveryStarted,
    /// Crash recovery finished for this execution.
    #[serde(rename = "recovery.completed")]
    RecoveryCompleted,
    /// Writer checkpoint marker.
    #[serde(rename = "checkpoint")]
    Checkpoint,
}

impl WalEntryKind {
    /// Whether this kind terminates an execution.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted | Self::ExecutionFailed | Self::ExecutionAborted
        )
    }

    /// Stable dotted wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted => "execution.completed",
            Self::ExecutionFailed => "execution.failed",
            Self::ExecutionAborted => "execution.aborted",
            Self::StepStarted => "step.started",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::StepSkipped => "step.skipped",
            Self::FallbackTriggered => "fallback.triggered",
            Self::FallbackExhausted => "fallback.exhausted",
            Self::ContractValidated => "contract.validated",
            Self::ContractViolated => "contract.violated",
            Self::RecoveryStarted => "recovery.started",
            Self::RecoveryCompleted => "recovery.completed",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for WalEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  Entry
//─────────────────────────────

/// One journaled state transition.
///
/// `entry_hash` covers the canonical encoding of `{seq, executionId,
/// timestampIso, entryType, payload, prevHash, version}`. The signature, when
/// present, covers the canonical entry minus the signature fields themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    /// Strictly monotonic sequence within one execution, starting at 1.
    pub seq: u64,
    /// Execution this entry belongs to.
    pub execution_id: Uuid,
    /// RFC 3339 timestamp of the append.
    pub timestamp_iso: String,
    /// Entry type.
    #[serde(rename = "entryType")]
    pub kind: WalEntryKind,
    /// Entry-type-specific payload.
    pub payload: Value,
    /// `entry_hash` of the predecessor; `None` at seq 1.
    pub prev_hash: Option<String>,
    /// SHA-256 content hash of this entry.
    pub entry_hash: String,
    /// WAL format version.
    pub version: String,
    /// Id of the key that signed this entry, when signing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<String>,
    /// Base64 Ed25519 signature, when signing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WalEntry {
    /// Canonical hash input: the entry minus hash and signature fields.
    pub fn hashable_value(
        seq: u64,
        execution_id: Uuid,
        timestamp_iso: &str,
        kind: WalEntryKind,
        payload: &Value,
        prev_hash: Option<&str>,
        version: &str,
    ) -> Value {
        json!({
            "seq": seq,
            "executionId": execution_id.to_string(),
            "timestampIso": timestamp_iso,
            "entryType": kind.as_str(),
            "payload": payload,
            "prevHash": prev_hash,
            "version": version,
        })
    }

    /// Recompute this entry's content hash from its fields.
    pub fn computed_hash(&self) -> String {
        hash_value(&Self::hashable_value(
            self.seq,
            self.execution_id,
            &self.timestamp_iso,
            self.kind,
            &self.payload,
            self.prev_hash.as_deref(),
            &self.version,
        ))
    }

    /// Canonical bytes a signature covers: the entry minus the signature.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let value = json!({
            "seq": self.seq,
            "executionId": self.execution_id.to_string(),
            "timestampIso": self.timestamp_iso,
            "entryType": self.kind.as_str(),
            "payload": self.payload,
            "prevHash": self.prev_hash,
            "version": self.version,
            "entryHash": self.entry_hash,
        });
        intentusnet_hash::canonical_json(&value).into_bytes()
    }
}
