//! Typed payloads for the entry kinds the router and recovery emit.
//!
//! Payloads serialize into the opaque `payload` object of a [`WalEntry`];
//! keeping them typed here keeps the router, recorder and recovery agreeing
//! on field names without string literals scattered around.
//!
//! [`WalEntry`]: crate::WalEntry

use serde::{Deserialize, Serialize};

use intentusnet_types::{ErrorInfo, SideEffectClass};

/// Payload of `execution.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStartedPayload {
    /// Content hash of the submitted envelope.
    pub envelope_hash: String,
    /// Intent reference, `name/version`.
    pub intent: String,
    /// Requested strategy, wire name.
    pub strategy: String,
    /// Idempotency key, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Payload of `execution.completed` and `execution.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFinishedPayload {
    /// Content hash of the final response.
    pub response_hash: String,
    /// Terminal error, present on `execution.failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Deterministic execution fingerprint, present on `execution.completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Payload of `step.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStartedPayload {
    /// Step identifier, stable across retries of the same step.
    pub step_id: String,
    /// Serving agent.
    pub agent: String,
    /// Declared side-effect class, if the agent classified the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<SideEffectClass>,
    /// Content hash of the step input.
    pub input_hash: String,
    /// Contracted deadline for this attempt.
    pub timeout_ms: u64,
    /// Retry ordinal, 0 for the first attempt.
    #[serde(default)]
    pub attempt: u32,
}

/// Payload of `step.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFinishedPayload {
    /// Step identifier.
    pub step_id: String,
    /// Serving agent.
    pub agent: String,
    /// Content hash of the step output.
    pub output_hash: String,
}

/// Payload of `step.failed` and `step.skipped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailedPayload {
    /// Step identifier.
    pub step_id: String,
    /// Serving agent.
    pub agent: String,
    /// The failure, normalized.
    pub error: ErrorInfo,
}

/// Payload of `fallback.triggered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackTriggeredPayload {
    /// Candidate that just failed.
    pub from_agent: String,
    /// Candidate about to be attempted.
    pub to_agent: String,
    /// Why the router advanced.
    pub reason: String,
}

/// Payload of `fallback.exhausted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackExhaustedPayload {
    /// How many candidates were attempted.
    pub attempts: u32,
}

/// Payload of `contract.validated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractValidatedPayload {
    /// Step the validation applies to.
    pub step_id: String,
    /// Declared side-effect class at validation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<SideEffectClass>,
    /// Set when the fallback chain escalated the side-effect severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<SideEffectClass>,
}

/// Payload of `contract.violated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractViolatedPayload {
    /// Step the violation occurred on, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Which contract field was breached, e.g. `timeout_ms`.
    pub reason: String,
}

/// Payload of `recovery.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStartedPayload {
    /// `resuming` or `blocked`.
    pub state: String,
    /// Why recovery reached this state, e.g. `irreversible_in_flight`.
    pub reason: String,
    /// Step recovery is acting on, when one is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Payload of `recovery.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryFinishedPayload {
    /// Outcome: `resumed`, `compensated` or `aborted`.
    pub outcome: String,
    /// Step the outcome applies to, when one was in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}
