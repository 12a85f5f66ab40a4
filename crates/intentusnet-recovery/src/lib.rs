#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-recovery** – Conservative crash recovery over execution WALs.
//!
//! A crash leaves an execution's WAL without a terminal entry. Recovery scans
//! the WAL directory, replays each incomplete log, classifies the in-flight
//! step by its side-effect class, and decides: `RESUME` for read-only and
//! reversible steps (the latter through the agent's compensation hook) or
//! `BLOCK` for anything irreversible, unclassified or corrupted. Recovery
//! never re-executes an irreversible step whose completion is not recorded.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use intentusnet_hash::{Ed25519Signer, KeyRegistry};
use intentusnet_registry::AgentRegistry;
use intentusnet_types::SideEffectClass;
use intentusnet_wal::{
    RecoveryFinishedPayload, RecoveryStartedPayload, WalEntryKind, WalReader, WalWriter,
};

//─────────────────────────────
//  Decisions
//─────────────────────────────

/// Why an incomplete execution is blocked on an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// An irreversible step started and its completion is not recorded.
    IrreversibleInFlight,
    /// The WAL failed integrity verification.
    WalCorrupted,
    /// The in-flight step's side-effect class is not declared.
    UnclassifiedSideEffect,
    /// The step is reversible but its agent declares no compensation hook.
    NoCompensationHook,
}

impl BlockReason {
    /// Stable identifier surfaced to operators.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IrreversibleInFlight => "irreversible_in_flight",
            Self::WalCorrupted => "wal_corrupted",
            Self::UnclassifiedSideEffect => "unclassified_side_effect",
            Self::NoCompensationHook => "no_compensation_hook",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What recovery decided for one incomplete execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "decision")]
pub enum RecoveryDecision {
    /// Safe to resume; `from_step` names the in-flight step when one exists.
    Resume {
        /// Step id recovery acts on; `None` when the crash fell between steps.
        #[serde(rename = "fromStep", skip_serializing_if = "Option::is_none")]
        from_step: Option<String>,
    },
    /// Operator action required.
    Block {
        /// Why the execution is blocked.
        reason: BlockReason,
    },
}

/// One incomplete execution surfaced by a scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteExecution {
    /// The execution lacking a terminal WAL entry.
    pub execution_id: Uuid,
    /// Recovery's decision.
    #[serde(flatten)]
    pub decision: RecoveryDecision,
    /// Highest valid sequence number in the WAL.
    pub last_seq: u64,
    /// Agent serving the in-flight step, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight_agent: Option<String>,
}

/// Outcome of acting on an incomplete execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The in-flight step was compensated and the execution closed.
    Compensated,
    /// Nothing was in flight; the execution was closed.
    Closed,
    /// The execution was aborted by the operator.
    Aborted,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Recovery failures.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The execution's WAL is complete; there is nothing to recover.
    #[error("execution {0} is not incomplete")]
    NotIncomplete(Uuid),
    /// The execution is blocked and cannot be resumed automatically.
    #[error("execution {execution_id} is blocked: {reason}")]
    Blocked {
        /// The blocked execution.
        execution_id: Uuid,
        /// Why it is blocked.
        reason: BlockReason,
    },
    /// The in-flight step's agent is no longer registered.
    #[error("agent '{0}' for the in-flight step is not registered")]
    UnknownAgent(String),
    /// The agent's compensation hook failed.
    #[error("compensation failed for step '{step_id}': {message}")]
    CompensationFailed {
        /// Step whose compensation failed.
        step_id: String,
        /// Failure detail.
        message: String,
    },
    /// Underlying WAL read, write or verification failed.
    #[error(transparent)]
    Wal(#[from] intentusnet_wal::WalError),
    /// Directory enumeration failed.
    #[error("failed to scan WAL directory '{path}': {source}")]
    Io {
        /// Directory being scanned.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for recovery operations.
pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;

//─────────────────────────────
//  Manager
//─────────────────────────────

/// Scans WALs and drives recovery decisions.
pub struct RecoveryManager {
    wal_dir: PathBuf,
    keys: Option<KeyRegistry>,
    signer: Option<Ed25519Signer>,
}

impl RecoveryManager {
    /// Manager over `wal_dir`. `keys` enables signature verification during
    /// scans; `signer` signs the recovery entries the manager appends.
    pub fn new(
        wal_dir: impl Into<PathBuf>,
        keys: Option<KeyRegistry>,
        signer: Option<Ed25519Signer>,
    ) -> Self {
        Self { wal_dir: wal_dir.into(), keys, signer }
    }

    /// Enumerate executions whose WAL lacks a terminal entry and classify
    /// each one. Results are sorted by execution id for stable output.
    pub async fn scan(&self) -> RecoveryResult<Vec<IncompleteExecution>> {
        let mut incomplete = Vec::new();

        let mut dir = match tokio::fs::read_dir(&self.wal_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(incomplete),
            Err(e) => return Err(RecoveryError::Io { path: self.wal_dir.clone(), source: e }),
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| RecoveryError::Io { path: self.wal_dir.clone(), source: e })?
        {
            let path = entry.path();
            let Some(execution_id) = intentusnet_wal::execution_id_from_path(&path) else {
                continue;
            };
            if let Some(found) = self.classify(&path, execution_id).await? {
                incomplete.push(found);
            }
        }

        incomplete.sort_by_key(|e| e.execution_id);
        Ok(incomplete)
    }

    async fn classify(
        &self,
        path: &Path,
        execution_id: Uuid,
    ) -> RecoveryResult<Option<IncompleteExecution>> {
        let outcome = match WalReader::verify(path, self.keys.as_ref()).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_integrity() => {
                warn!(%execution_id, %err, "WAL failed verification during scan");
                return Ok(Some(IncompleteExecution {
                    execution_id,
                    decision: RecoveryDecision::Block { reason: BlockReason::WalCorrupted },
                    last_seq: 0,
                    in_flight_agent: None,
                }));
            }
            Err(err) => return Err(err.into()),
        };

        if outcome.has_terminal() {
            return Ok(None);
        }

        let last_seq = outcome.last().map(|e| e.seq).unwrap_or(0);
        let Some(in_flight) = outcome.in_flight_step() else {
            // Crash between steps: nothing external is half-done.
            return Ok(Some(IncompleteExecution {
                execution_id,
                decision: RecoveryDecision::Resume { from_step: None },
                last_seq,
                in_flight_agent: None,
            }));
        };

        let step_id = in_flight.payload.get("stepId").and_then(Value::as_str).map(String::from);
        let agent = in_flight.payload.get("agent").and_then(Value::as_str).map(String::from);
        let side_effect: Option<SideEffectClass> = in_flight
            .payload
            .get("sideEffect")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        let decision = match side_effect {
            Some(SideEffectClass::ReadOnly) | Some(SideEffectClass::Reversible) => {
                RecoveryDecision::Resume { from_step: step_id }
            }
            Some(SideEffectClass::Irreversible) => {
                RecoveryDecision::Block { reason: BlockReason::IrreversibleInFlight }
            }
            // Unclassified side effects get the conservative default.
            None => RecoveryDecision::Block { reason: BlockReason::UnclassifiedSideEffect },
        };

        Ok(Some(IncompleteExecution { execution_id, decision, last_seq, in_flight_agent: agent }))
    }

    /// Resume one incomplete execution.
    ///
    /// Read-only in-flight steps need no undo. Reversible steps are undone
    /// through the agent's compensation hook; an absent hook blocks. The WAL
    /// is closed with `recovery.*` entries and a terminal `execution.aborted`
    /// so the envelope can be resubmitted cleanly.
    pub async fn resume(
        &self,
        execution: &IncompleteExecution,
        registry: &AgentRegistry,
    ) -> RecoveryResult<RecoveryOutcome> {
        let from_step = match &execution.decision {
            RecoveryDecision::Resume { from_step } => from_step.clone(),
            RecoveryDecision::Block { reason } => {
                return Err(RecoveryError::Blocked {
                    execution_id: execution.execution_id,
                    reason: *reason,
                });
            }
        };

        let mut writer =
            WalWriter::reopen(&self.wal_dir, execution.execution_id, self.signer.clone()).await?;

        let Some(step_id) = from_step else {
            // Nothing was in flight; just close the log.
            writer
                .append_payload(
                    WalEntryKind::RecoveryStarted,
                    &RecoveryStartedPayload {
                        state: "resuming".into(),
                        reason: "no_step_in_flight".into(),
                        step_id: None,
                    },
                )
                .await?;
            writer
                .append_payload(
                    WalEntryKind::RecoveryCompleted,
                    &RecoveryFinishedPayload { outcome: "resumed".into(), step_id: None },
                )
                .await?;
            writer
                .append(WalEntryKind::ExecutionAborted, serde_json::json!({"reason": "crash_recovery"}))
                .await?;
            info!(execution_id = %execution.execution_id, "closed execution with no in-flight step");
            return Ok(RecoveryOutcome::Closed);
        };

        // A reversible step needs its compensation hook; read-only steps can
        // simply be dropped, and need no agent at all.
        let needs_compensation = {
            let wal_outcome =
                WalReader::read(&intentusnet_wal::wal_path(&self.wal_dir, execution.execution_id))
                    .await?;
            wal_outcome
                .in_flight_step()
                .and_then(|e| e.payload.get("sideEffect").cloned())
                .and_then(|v| serde_json::from_value::<SideEffectClass>(v).ok())
                == Some(SideEffectClass::Reversible)
        };

        let agent = if needs_compensation {
            let agent_name = execution
                .in_flight_agent
                .clone()
                .ok_or_else(|| RecoveryError::UnknownAgent("<unrecorded>".into()))?;
            let agent = registry
                .find_agent(&agent_name)
                .await
                .ok_or(RecoveryError::UnknownAgent(agent_name))?;
            if !agent.has_compensation() {
                return Err(RecoveryError::Blocked {
                    execution_id: execution.execution_id,
                    reason: BlockReason::NoCompensationHook,
                });
            }
            Some(agent)
        } else {
            None
        };

        writer
            .append_payload(
                WalEntryKind::RecoveryStarted,
                &RecoveryStartedPayload {
                    state: "resuming".into(),
                    reason: if needs_compensation {
                        "reversible_in_flight".into()
                    } else {
                        "read_only_in_flight".into()
                    },
                    step_id: Some(step_id.clone()),
                },
            )
            .await?;

        if let Some(agent) = &agent {
            agent.compensate(&step_id).await.map_err(|e| RecoveryError::CompensationFailed {
                step_id: step_id.clone(),
                message: format!("{e:#}"),
            })?;
        }

        writer
            .append_payload(
                WalEntryKind::RecoveryCompleted,
                &RecoveryFinishedPayload {
                    outcome: if needs_compensation { "compensated".into() } else { "resumed".into() },
                    step_id: Some(step_id.clone()),
                },
            )
            .await?;
        writer
            .append(WalEntryKind::ExecutionAborted, serde_json::json!({"reason": "crash_recovery"}))
            .await?;

        info!(execution_id = %execution.execution_id, step_id, "recovered in-flight step");
        Ok(if needs_compensation { RecoveryOutcome::Compensated } else { RecoveryOutcome::Closed })
    }

    /// Journal a BLOCK decision into the execution's WAL.
    ///
    /// Idempotent across repeated scans: if the log already ends in a blocked
    /// `recovery.started`, nothing is appended.
    pub async fn mark_blocked(
        &self,
        execution_id: Uuid,
        reason: BlockReason,
    ) -> RecoveryResult<()> {
        let path = intentusnet_wal::wal_path(&self.wal_dir, execution_id);
        let outcome = WalReader::read(&path).await?;
        let already_marked = outcome
            .last()
            .map(|e| {
                e.kind == WalEntryKind::RecoveryStarted
                    && e.payload.get("state").and_then(Value::as_str) == Some("blocked")
            })
            .unwrap_or(false);
        if already_marked {
            return Ok(());
        }

        let mut writer = WalWriter::reopen(&self.wal_dir, execution_id, self.signer.clone()).await?;
        writer
            .append_payload(
                WalEntryKind::RecoveryStarted,
                &RecoveryStartedPayload {
                    state: "blocked".into(),
                    reason: reason.as_str().into(),
                    step_id: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Abort an incomplete execution outright, recording the operator action.
    pub async fn abort(&self, execution_id: Uuid) -> RecoveryResult<RecoveryOutcome> {
        let path = intentusnet_wal::wal_path(&self.wal_dir, execution_id);
        let outcome = WalReader::read(&path).await?;
        if outcome.has_terminal() {
            return Err(RecoveryError::NotIncomplete(execution_id));
        }

        let mut writer = WalWriter::reopen(&self.wal_dir, execution_id, self.signer.clone()).await?;
        writer
            .append_payload(
                WalEntryKind::RecoveryStarted,
                &RecoveryStartedPayload {
                    state: "aborting".into(),
                    reason: "operator_abort".into(),
                    step_id: None,
                },
            )
            .await?;
        writer
            .append(WalEntryKind::ExecutionAborted, serde_json::json!({"reason": "operator_abort"}))
            .await?;

        info!(%execution_id, "execution aborted by operator");
        Ok(RecoveryOutcome::Aborted)
    }
}
