//! Deterministic execution fingerprints for drift detection.
//!
//! The fingerprint hashes only the dimensions that must be identical across
//! repeated runs of the same envelope: intents, the agent sequence, input
//! and output hashes, retry counts, the decision path, and contracted
//! timeouts. Wall-clock timestamps, execution ids and log text never
//! participate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use intentusnet_hash::{hash_encoded, hash_value};
use intentusnet_types::{ErrorCode, ErrorInfo, IntentRef};
use intentusnet_wal::{WalEntry, WalEntryKind};

/// Canonical deterministic tuple of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFingerprint {
    /// Content hash of each routed intent, in order.
    pub intent_sequence: Vec<String>,
    /// Agent names in step execution order.
    pub tool_sequence: Vec<String>,
    /// Input hash of each started step, in order.
    pub param_hashes: Vec<String>,
    /// Output hash of each completed step, in order.
    pub output_hashes: Vec<String>,
    /// Retry count per step id. BTreeMap keeps the encoding ordered.
    pub retry_pattern: BTreeMap<String, u32>,
    /// The router's decision path.
    pub execution_order: Vec<String>,
    /// Contracted timeout of each started step, in order.
    pub timeout_values: Vec<u64>,
}

impl ExecutionFingerprint {
    /// SHA-256 over the canonical tuple.
    pub fn digest(&self) -> String {
        // Serialization of a plain struct of strings and integers cannot fail.
        hash_encoded(self).expect("fingerprint serialization is infallible")
    }
}

/// Builds fingerprints from an execution's WAL.
#[derive(Debug, Default)]
pub struct FingerprintEngine;

impl FingerprintEngine {
    /// Compute the fingerprint of an execution at completion time.
    pub fn compute(
        intent: &IntentRef,
        entries: &[WalEntry],
        decision_path: &[String],
    ) -> ExecutionFingerprint {
        let intent_hash = hash_value(&serde_json::json!({
            "name": intent.name,
            "version": intent.version,
        }));

        let mut tool_sequence = Vec::new();
        let mut param_hashes = Vec::new();
        let mut output_hashes = Vec::new();
        let mut timeout_values = Vec::new();
        let mut retry_pattern: BTreeMap<String, u32> = BTreeMap::new();

        for entry in entries {
            match entry.kind {
                WalEntryKind::StepStarted => {
                    if let Some(agent) = entry.payload.get("agent").and_then(Value::as_str) {
                        tool_sequence.push(agent.to_string());
                    }
                    if let Some(hash) = entry.payload.get("inputHash").and_then(Value::as_str) {
                        param_hashes.push(hash.to_string());
                    }
                    if let Some(timeout) = entry.payload.get("timeoutMs").and_then(Value::as_u64) {
                        timeout_values.push(timeout);
                    }
                    if let Some(step_id) = entry.payload.get("stepId").and_then(Value::as_str) {
                        let attempt =
                            entry.payload.get("attempt").and_then(Value::as_u64).unwrap_or(0) as u32;
                        let count = retry_pattern.entry(step_id.to_string()).or_insert(0);
                        *count = (*count).max(attempt);
                    }
                }
                WalEntryKind::StepCompleted => {
                    if let Some(hash) = entry.payload.get("outputHash").and_then(Value::as_str) {
                        output_hashes.push(hash.to_string());
                    }
                }
                _ => {}
            }
        }

        ExecutionFingerprint {
            intent_sequence: vec![intent_hash],
            tool_sequence,
            param_hashes,
            output_hashes,
            retry_pattern,
            execution_order: decision_path.to_vec(),
            timeout_values,
        }
    }
}

/// Compare fingerprints from repeated runs of one deterministic envelope.
///
/// A mismatch is drift and surfaces as a typed failure; it is never silently
/// healed.
pub fn detect_drift(digests: &[String]) -> Result<(), ErrorInfo> {
    let Some(first) = digests.first() else { return Ok(()) };
    for (i, digest) in digests.iter().enumerate().skip(1) {
        if digest != first {
            return Err(ErrorInfo::new(
                ErrorCode::DeterminismViolation,
                format!("fingerprint drift: run {i} diverged from run 0"),
            )
            .with_subtype("fingerprint_drift")
            .with_detail("expected", serde_json::json!(first))
            .with_detail("observed", serde_json::json!(digest)));
        }
    }
    Ok(())
}
