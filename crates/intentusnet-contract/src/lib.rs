#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-contract** – Runtime enforcement of execution contracts.
//!
//! Structural contract validation lives with the data model in
//! `intentusnet-types`; this crate enforces contracts while an execution is
//! in flight: per-attempt deadlines, the exactly-once step ledger, cost
//! budgets, and the side-effect rules that govern fallback chains.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use intentusnet_types::{
    ErrorCode, ErrorInfo, ExecutionContract, IntentEnvelope, SideEffectClass,
};

//─────────────────────────────
//  Deadline enforcement
//─────────────────────────────

/// Run an agent invocation under the contract's per-attempt deadline.
///
/// On expiry the future is dropped (best-effort cancellation) and the attempt
/// resolves to a retryable `TIMEOUT` whose recovery strategy lets the router
/// continue to the next fallback candidate immediately. The caller records
/// the matching `contract.violated` entry.
pub async fn invoke_with_deadline<T, F>(timeout_ms: u64, fut: F) -> Result<T, ErrorInfo>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(timeout_ms, "agent attempt exceeded contracted deadline");
            Err(ErrorInfo::new(
                ErrorCode::Timeout,
                format!("attempt exceeded contracted deadline of {timeout_ms}ms"),
            )
            .retryable()
            .with_subtype("timeout_ms"))
        }
    }
}

//─────────────────────────────
//  Exactly-once step ledger
//─────────────────────────────

/// In-memory set of completed step ids, rebuilt from the WAL on resume.
///
/// Under an `exactly_once` contract a step id that already completed must
/// never run again; the ledger turns a re-attempt into a
/// `CONTRACT_VIOLATION` before any agent is invoked.
#[derive(Debug, Default)]
pub struct StepLedger {
    completed: HashSet<String>,
}

impl StepLedger {
    /// Empty ledger for a fresh execution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with step ids already completed in a prior run.
    pub fn with_completed<I: IntoIterator<Item = String>>(completed: I) -> Self {
        Self { completed: completed.into_iter().collect() }
    }

    /// Record a completed step.
    pub fn record_completed(&mut self, step_id: &str) {
        self.completed.insert(step_id.to_string());
    }

    /// Whether the step already completed.
    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed.contains(step_id)
    }

    /// Gate a new attempt of `step_id` under the contract.
    pub fn check_attempt(
        &self,
        contract: &ExecutionContract,
        step_id: &str,
    ) -> Result<(), ErrorInfo> {
        if contract.exactly_once && self.is_completed(step_id) {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                format!("step '{step_id}' already completed under an exactly-once contract"),
            )
            .with_subtype("exactly_once"));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Fallback chain guard
//─────────────────────────────

/// Outcome of admitting a step into the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAdmission {
    /// Set when this step raises the side-effect severity of the chain.
    pub escalated_from: Option<SideEffectClass>,
}

/// Enforces the side-effect rules along a fallback chain.
///
/// Once an irreversible step has started, no further candidate may be tried;
/// escalation READ_ONLY → REVERSIBLE → IRREVERSIBLE is admitted but reported
/// so the router can journal it.
#[derive(Debug, Default)]
pub struct FallbackChainGuard {
    last: Option<SideEffectClass>,
    irreversible_started: bool,
}

impl FallbackChainGuard {
    /// Guard for a fresh chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another candidate may still be attempted.
    pub fn may_continue(&self) -> bool {
        !self.irreversible_started
    }

    /// Admit the next step with the given classification.
    pub fn admit(&mut self, side_effect: Option<SideEffectClass>) -> Result<ChainAdmission, ErrorInfo> {
        if self.irreversible_started {
            return Err(ErrorInfo::new(
                ErrorCode::ContractViolation,
                "no fallback candidate may run after an irreversible step has started",
            )
            .with_subtype("fallback_after_irreversible"));
        }

        let escalated_from = match (self.last, side_effect) {
            (Some(prev), Some(next)) if prev.escalates_to(next) => Some(prev),
            _ => None,
        };

        if side_effect == Some(SideEffectClass::Irreversible) {
            self.irreversible_started = true;
        }
        if side_effect.is_some() {
            self.last = side_effect;
        }
        Ok(ChainAdmission { escalated_from })
    }
}

//─────────────────────────────
//  Cost estimation
//─────────────────────────────

/// Pre-execution cost estimator consulted before `execution.started`.
#[async_trait]
pub trait CostEstimator: Send + Sync {
    /// Estimated cost units for routing `envelope`.
    async fn estimate(&self, envelope: &IntentEnvelope) -> f64;
}

/// Flat per-candidate estimator: a fixed cost per expected agent attempt.
#[derive(Debug, Clone)]
pub struct FlatRateEstimator {
    /// Cost units charged per expected attempt.
    pub units_per_attempt: f64,
}

impl Default for FlatRateEstimator {
    fn default() -> Self {
        Self { units_per_attempt: 1.0 }
    }
}

#[async_trait]
impl CostEstimator for FlatRateEstimator {
    async fn estimate(&self, _envelope: &IntentEnvelope) -> f64 {
        self.units_per_attempt
    }
}

/// Gate an execution on its contracted budget. Runs before any WAL entry is
/// written; an over-budget envelope never starts.
pub fn enforce_budget(estimated: f64, contract: &ExecutionContract) -> Result<(), ErrorInfo> {
    if estimated > contract.max_cost_units {
        return Err(ErrorInfo::new(
            ErrorCode::BudgetExceeded,
            format!(
                "estimated cost {estimated} exceeds contracted budget {}",
                contract.max_cost_units
            ),
        )
        .with_detail("estimatedCost", serde_json::json!(estimated))
        .with_detail("maxCostUnits", serde_json::json!(contract.max_cost_units)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expires_into_retryable_timeout() {
        let err = invoke_with_deadline(10, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            42
        })
        .await
        .unwrap_err();

        assert!(err.is(ErrorCode::Timeout));
        assert!(err.retryable);
        assert_eq!(err.subtype(), Some("timeout_ms"));
        assert!(err.recovery.allows_fallback());
    }

    #[tokio::test]
    async fn deadline_passes_fast_results_through() {
        let value = invoke_with_deadline(1_000, async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn exactly_once_blocks_replayed_steps() {
        let contract = ExecutionContract { exactly_once: true, ..Default::default() };
        let mut ledger = StepLedger::new();

        assert!(ledger.check_attempt(&contract, "step-1").is_ok());
        ledger.record_completed("step-1");

        let err = ledger.check_attempt(&contract, "step-1").unwrap_err();
        assert_eq!(err.subtype(), Some("exactly_once"));

        // Without exactly-once, replays are allowed.
        let relaxed = ExecutionContract::default();
        assert!(ledger.check_attempt(&relaxed, "step-1").is_ok());
    }

    #[test]
    fn chain_guard_blocks_fallback_after_irreversible() {
        let mut guard = FallbackChainGuard::new();
        guard.admit(Some(SideEffectClass::ReadOnly)).unwrap();
        assert!(guard.may_continue());

        let admission = guard.admit(Some(SideEffectClass::Irreversible)).unwrap();
        assert_eq!(admission.escalated_from, Some(SideEffectClass::ReadOnly));
        assert!(!guard.may_continue());

        let err = guard.admit(Some(SideEffectClass::ReadOnly)).unwrap_err();
        assert_eq!(err.subtype(), Some("fallback_after_irreversible"));
    }

    #[test]
    fn chain_guard_reports_escalation_only_upward() {
        let mut guard = FallbackChainGuard::new();
        guard.admit(Some(SideEffectClass::Reversible)).unwrap();
        let admission = guard.admit(Some(SideEffectClass::ReadOnly)).unwrap();
        assert_eq!(admission.escalated_from, None);
    }

    #[test]
    fn budget_gate() {
        let contract = ExecutionContract { max_cost_units: 10.0, ..Default::default() };
        assert!(enforce_budget(10.0, &contract).is_ok());

        let err = enforce_budget(10.5, &contract).unwrap_err();
        assert!(err.is(ErrorCode::BudgetExceeded));
    }
}
