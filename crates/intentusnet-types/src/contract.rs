//! Execution contracts, side-effect classification and compliance modes.
//!
//! A contract declares the guarantees a caller demands from one routed
//! execution. Structural validation lives here so every layer can reject a
//! malformed contract without pulling in the enforcement machinery; runtime
//! enforcement (deadlines, step ledgers, budgets) lives in
//! `intentusnet-contract`.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ErrorInfo};

/// Default step timeout when a contract does not name one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default cost budget when a contract does not name one.
pub const DEFAULT_MAX_COST_UNITS: f64 = 1_000.0;

//─────────────────────────────
//  Side-effect classes
//─────────────────────────────

/// Replay-safety classification of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffectClass {
    /// No observable side effect; always safe to replay.
    ReadOnly,
    /// Side effect with a declared compensation; replay via compensation.
    Reversible,
    /// Side effect that cannot be undone; never replayed automatically.
    Irreversible,
}

impl SideEffectClass {
    /// Whether transitioning from `self` to `next` is permitted within a
    /// fallback chain. Irreversible never transitions to anything; escalation
    /// along READ_ONLY → REVERSIBLE → IRREVERSIBLE is permitted but recorded.
    pub fn may_escalate_to(self, next: SideEffectClass) -> bool {
        let _ = next;
        self != Self::Irreversible
    }

    /// Whether moving from `self` to `next` raises the side-effect severity.
    pub fn escalates_to(self, next: SideEffectClass) -> bool {
        self.rank() < next.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::ReadOnly => 0,
            Self::Reversible => 1,
            Self::Irreversible => 2,
        }
    }
}

impl std::fmt::Display for SideEffectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadOnly => "READ_ONLY",
            Self::Reversible => "REVERSIBLE",
            Self::Irreversible => "IRREVERSIBLE",
        };
        f.write_str(name)
    }
}

//─────────────────────────────
//  Execution contract
//─────────────────────────────

/// Declared execution guarantees for one routed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContract {
    /// Each step id may complete at most once.
    #[serde(default)]
    pub exactly_once: bool,
    /// Forbid retries entirely; incompatible with `max_retries > 0`.
    #[serde(default)]
    pub no_retry: bool,
    /// Maximum retries per step. Forbidden for irreversible steps.
    #[serde(default)]
    pub max_retries: u32,
    /// Require the serving agent to declare idempotent handling.
    #[serde(default)]
    pub idempotent_required: bool,
    /// Per-attempt deadline in milliseconds; must be positive.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pre-execution cost ceiling; must be positive.
    #[serde(default = "default_max_cost_units")]
    pub max_cost_units: f64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_cost_units() -> f64 {
    DEFAULT_MAX_COST_UNITS
}

impl Default for ExecutionContract {
    fn default() -> Self {
        Self {
            exactly_once: false,
            no_retry: false,
            max_retries: 0,
            idempotent_required: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_cost_units: DEFAULT_MAX_COST_UNITS,
        }
    }
}

impl ExecutionContract {
    /// Validate the contract against the step's side-effect class.
    ///
    /// Violations are reported as `CONTRACT_VIOLATION` errors and must be
    /// raised before any WAL entry exists for the execution.
    pub fn validate(&self, side_effect: Option<SideEffectClass>) -> Result<(), ErrorInfo> {
        if self.max_retries > 0 && side_effect == Some(SideEffectClass::Irreversible) {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                "maxRetries > 0 is forbidden for irreversible steps",
            )
            .with_subtype("retries_on_irreversible"));
        }
        if self.no_retry && self.max_retries > 0 {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                "noRetry and maxRetries > 0 are mutually exclusive",
            )
            .with_subtype("no_retry_conflict"));
        }
        if self.timeout_ms == 0 {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                "timeoutMs must be positive",
            )
            .with_subtype("invalid_timeout"));
        }
        if !(self.max_cost_units > 0.0) {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                "maxCostUnits must be positive",
            )
            .with_subtype("invalid_budget"));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Compliance modes
//─────────────────────────────

/// Enforcement posture validated at router initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceMode {
    /// No constraints; everything is permitted.
    Development,
    /// Determinism required: PARALLEL is blocked. WAL signing optional.
    Standard,
    /// Determinism required, WAL signing required, PII redaction configured.
    Regulated,
}

impl ComplianceMode {
    /// Whether this mode forbids nondeterministic strategies.
    pub fn requires_determinism(self) -> bool {
        matches!(self, Self::Standard | Self::Regulated)
    }

    /// Whether this mode mandates signed WAL entries.
    pub fn requires_signing(self) -> bool {
        matches!(self, Self::Regulated)
    }

    /// Whether this mode mandates a configured redaction policy.
    pub fn requires_redaction(self) -> bool {
        matches!(self, Self::Regulated)
    }
}

impl Default for ComplianceMode {
    fn default() -> Self {
        Self::Development
    }
}

impl std::fmt::Display for ComplianceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Development => "DEVELOPMENT",
            Self::Standard => "STANDARD",
            Self::Regulated => "REGULATED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_irreversible_rejected() {
        let contract = ExecutionContract { max_retries: 3, ..Default::default() };
        let err = contract.validate(Some(SideEffectClass::Irreversible)).unwrap_err();
        assert!(err.is(ErrorCode::ContractViolation));
        assert_eq!(err.subtype(), Some("retries_on_irreversible"));

        // Same retries are fine on a reversible step.
        assert!(contract.validate(Some(SideEffectClass::Reversible)).is_ok());
    }

    #[test]
    fn no_retry_conflicts_with_retries() {
        let contract = ExecutionContract { no_retry: true, max_retries: 1, ..Default::default() };
        let err = contract.validate(None).unwrap_err();
        assert_eq!(err.subtype(), Some("no_retry_conflict"));
    }

    #[test]
    fn zero_timeout_and_budget_rejected() {
        let contract = ExecutionContract { timeout_ms: 0, ..Default::default() };
        assert_eq!(contract.validate(None).unwrap_err().subtype(), Some("invalid_timeout"));

        let contract = ExecutionContract { max_cost_units: 0.0, ..Default::default() };
        assert_eq!(contract.validate(None).unwrap_err().subtype(), Some("invalid_budget"));
    }

    #[test]
    fn irreversible_never_escalates() {
        assert!(!SideEffectClass::Irreversible.may_escalate_to(SideEffectClass::ReadOnly));
        assert!(!SideEffectClass::Irreversible.may_escalate_to(SideEffectClass::Irreversible));
        assert!(SideEffectClass::ReadOnly.may_escalate_to(SideEffectClass::Irreversible));
    }
}
