//! Stable, language-neutral error taxonomy.
//!
//! Error kinds are part of the wire contract: their serialized identifiers
//! must never change. Every structured failure also carries a recovery
//! strategy the router consults when deciding whether to advance to the next
//! fallback candidate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Detail key under which an error subtype is carried.
pub const SUBTYPE_KEY: &str = "subtype";

//─────────────────────────────
//  Error kinds
//─────────────────────────────

/// Stable error kinds shared by the router, WAL, recorder and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No registered agent matches the intent name and version.
    CapabilityNotFound,
    /// Invalid routing options or missing target agent.
    RoutingError,
    /// Agent panicked or returned a transport-level failure; normalized.
    InternalAgentError,
    /// Agent returned a structured error of its own.
    AgentError,
    /// Contract precondition or invariant breached.
    ContractViolation,
    /// Step exceeded its contracted timeout.
    Timeout,
    /// Pre-execution estimate exceeded the contracted budget.
    BudgetExceeded,
    /// WAL hash chain, sequence, or signature failure.
    WalIntegrityError,
    /// Terminal failure of an irreversible step.
    IrreversibleStepFailed,
    /// PARALLEL under a determinism-requiring mode, or fingerprint drift.
    DeterminismViolation,
    /// Registry name collision.
    DuplicateAgent,
    /// Surfaced from an external transport boundary.
    TransportError,
}

impl ErrorCode {
    /// Default recovery strategy for this kind of failure.
    pub fn default_recovery(self) -> RecoveryStrategy {
        match self {
            Self::Timeout => RecoveryStrategy::Fallback,
            Self::AgentError => RecoveryStrategy::Fallback,
            Self::InternalAgentError => RecoveryStrategy::Fallback,
            Self::TransportError => RecoveryStrategy::RetryAfterDelay,
            Self::IrreversibleStepFailed => RecoveryStrategy::ManualIntervention,
            Self::WalIntegrityError => RecoveryStrategy::ManualIntervention,
            _ => RecoveryStrategy::Abort,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde identifiers so logs and wire agree.
        let name = match self {
            Self::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Self::RoutingError => "ROUTING_ERROR",
            Self::InternalAgentError => "INTERNAL_AGENT_ERROR",
            Self::AgentError => "AGENT_ERROR",
            Self::ContractViolation => "CONTRACT_VIOLATION",
            Self::Timeout => "TIMEOUT",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::WalIntegrityError => "WAL_INTEGRITY_ERROR",
            Self::IrreversibleStepFailed => "IRREVERSIBLE_STEP_FAILED",
            Self::DeterminismViolation => "DETERMINISM_VIOLATION",
            Self::DuplicateAgent => "DUPLICATE_AGENT",
            Self::TransportError => "TRANSPORT_ERROR",
        };
        f.write_str(name)
    }
}

//─────────────────────────────
//  Recovery strategies
//─────────────────────────────

/// What the caller (or the router on its behalf) may do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Retry the same step immediately.
    Retry,
    /// Retry after a caller-chosen delay.
    RetryAfterDelay,
    /// Advance to the next fallback candidate.
    Fallback,
    /// Give up; the failure is terminal.
    Abort,
    /// An operator must intervene before anything else happens.
    ManualIntervention,
}

impl RecoveryStrategy {
    /// Whether the router may advance to the next fallback candidate.
    pub fn allows_fallback(self) -> bool {
        matches!(self, Self::Retry | Self::RetryAfterDelay | Self::Fallback)
    }
}

//─────────────────────────────
//  Structured error payload
//─────────────────────────────

/// Structured error carried inside an error [`AgentResponse`].
///
/// [`AgentResponse`]: crate::AgentResponse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Stable error kind.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Whether retrying the same step could plausibly succeed.
    pub retryable: bool,
    /// Kind-specific details; subtypes live under [`SUBTYPE_KEY`].
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// Strategy the router consults before advancing to a fallback.
    pub recovery: RecoveryStrategy,
}

impl ErrorInfo {
    /// Create an error with the kind's default recovery strategy.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            details: Map::new(),
            recovery: code.default_recovery(),
        }
    }

    /// Mark the error retryable, builder style.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Override the recovery strategy, builder style.
    pub fn with_recovery(mut self, recovery: RecoveryStrategy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Attach a subtype discriminator, builder style.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.details.insert(SUBTYPE_KEY.to_string(), Value::String(subtype.into()));
        self
    }

    /// Attach an arbitrary detail entry, builder style.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Subtype discriminator, if one was attached.
    pub fn subtype(&self) -> Option<&str> {
        self.details.get(SUBTYPE_KEY).and_then(Value::as_str)
    }

    /// Whether this error carries the given kind.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}
