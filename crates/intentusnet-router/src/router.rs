//! The routing pipeline: pre-flight gates, WAL emission, strategy execution,
//! record finalization.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use intentusnet_contract::{
    enforce_budget, invoke_with_deadline, CostEstimator, FallbackChainGuard, FlatRateEstimator,
    StepLedger,
};
use intentusnet_hash::{hash_encoded, hash_value, Ed25519Signer};
use intentusnet_recorder::{FingerprintEngine, RecordBuilder, RecordStore};
use intentusnet_registry::{AgentRegistry, IntentAgent};
use intentusnet_types::{
    AgentResponse, ComplianceMode, ErrorCode, ErrorInfo, ExecutionContract, IntentEnvelope,
    ResponseStatus, RoutingStrategy, SideEffectClass,
};
use intentusnet_wal::{
    ContractValidatedPayload, ContractViolatedPayload, ExecutionFinishedPayload,
    ExecutionStartedPayload, FallbackExhaustedPayload, FallbackTriggeredPayload, StepFailedPayload,
    StepFinishedPayload, StepStartedPayload, WalEntry, WalEntryKind, WalWriter,
};

use crate::hooks::{run_after, run_before, run_on_error};
use crate::order::order_candidates;
use crate::{RedactionPolicy, RouterHook};

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Router construction parameters, validated against the compliance mode.
pub struct RouterConfig {
    /// Enforcement posture.
    pub compliance: ComplianceMode,
    /// Directory holding one WAL file per execution.
    pub wal_dir: PathBuf,
    /// Directory holding one record file per execution.
    pub records_dir: PathBuf,
    /// WAL signer; mandatory under REGULATED.
    pub signer: Option<Ed25519Signer>,
    /// Redaction policy; mandatory under REGULATED.
    pub redaction: Option<RedactionPolicy>,
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("compliance", &self.compliance)
            .field("wal_dir", &self.wal_dir)
            .field("records_dir", &self.records_dir)
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

/// What `route` hands back to the runtime layer.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// The execution's id.
    pub execution_id: Uuid,
    /// The final response, success or structured error.
    pub response: AgentResponse,
}

//─────────────────────────────
//  Journal
//─────────────────────────────

/// WAL writer plus record builder, advanced in lockstep.
struct Journal {
    writer: WalWriter,
    builder: RecordBuilder,
    entries: Vec<WalEntry>,
}

impl Journal {
    async fn append<P: serde::Serialize>(&mut self, kind: WalEntryKind, payload: &P) -> Result<()> {
        let entry = self.writer.append_payload(kind, payload).await?;
        self.builder.observe(&entry)?;
        self.entries.push(entry);
        Ok(())
    }
}

//─────────────────────────────
//  Router
//─────────────────────────────

/// Deterministic capability-based router.
pub struct IntentRouter {
    registry: Arc<AgentRegistry>,
    estimator: Arc<dyn CostEstimator>,
    hooks: Vec<Arc<dyn RouterHook>>,
    records: RecordStore,
    config: RouterConfig,
}

impl IntentRouter {
    /// Construct a router, validating the compliance mode's requirements.
    pub fn new(config: RouterConfig, registry: Arc<AgentRegistry>) -> Result<Self> {
        if config.compliance.requires_signing() && config.signer.is_none() {
            anyhow::bail!(
                "compliance mode {} requires WAL signing but no signer is configured",
                config.compliance
            );
        }
        if config.compliance.requires_redaction() && config.redaction.is_none() {
            anyhow::bail!(
                "compliance mode {} requires a PII redaction policy but none is configured",
                config.compliance
            );
        }
        let records = RecordStore::new(&config.records_dir);
        Ok(Self {
            registry,
            estimator: Arc::new(FlatRateEstimator::default()),
            hooks: Vec::new(),
            records,
            config,
        })
    }

    /// Replace the cost estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Attach a middleware hook.
    pub fn with_hook(mut self, hook: Arc<dyn RouterHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Record store this router persists into.
    pub fn record_store(&self) -> &RecordStore {
        &self.records
    }

    /// Route one envelope under `contract` as execution `execution_id`.
    ///
    /// All agent-level failures return as `Ok` with an error response; `Err`
    /// is reserved for the router's own runtime faults (WAL or record I/O).
    #[instrument(skip(self, envelope, contract), fields(intent = %envelope.intent, strategy = %envelope.routing.strategy))]
    pub async fn route(
        &self,
        execution_id: Uuid,
        mut envelope: IntentEnvelope,
        contract: &ExecutionContract,
    ) -> Result<RouteOutcome> {
        run_before(&self.hooks, &mut envelope).await;

        // ── pre-write gates: nothing below creates the WAL file ──
        if let Err(validation) = envelope.validate() {
            let error = ErrorInfo::new(ErrorCode::RoutingError, validation.to_string())
                .with_subtype("invalid_envelope");
            return self.reject_before_wal(execution_id, &envelope, error).await;
        }

        if envelope.routing.strategy == RoutingStrategy::Parallel
            && self.config.compliance.requires_determinism()
        {
            let error = ErrorInfo::new(
                ErrorCode::DeterminismViolation,
                format!(
                    "PARALLEL routing is not permitted under compliance mode {}",
                    self.config.compliance
                ),
            )
            .with_subtype("parallel_blocked");
            return self.reject_before_wal(execution_id, &envelope, error).await;
        }

        let mut candidates = self.registry.find_agents_for_intent(&envelope.intent).await;
        if candidates.is_empty() {
            let error = ErrorInfo::new(
                ErrorCode::CapabilityNotFound,
                format!("no registered agent serves intent {}", envelope.intent),
            );
            return self.reject_before_wal(execution_id, &envelope, error).await;
        }
        order_candidates(&mut candidates);

        for candidate in &candidates {
            let side_effect = candidate.side_effect(&envelope.intent);
            if let Err(error) = contract.validate(side_effect) {
                return self.reject_before_wal(execution_id, &envelope, error).await;
            }
        }

        let estimated = self.estimator.estimate(&envelope).await;
        if let Err(error) = enforce_budget(estimated, contract) {
            return self.reject_before_wal(execution_id, &envelope, error).await;
        }

        // ── journaled phase ──
        let envelope_hash = hash_encoded(&envelope).context("failed to hash envelope")?;
        let writer = WalWriter::create(&self.config.wal_dir, execution_id, self.config.signer.clone())
            .await
            .context("failed to create execution WAL")?;
        let builder = RecordBuilder::new(execution_id, envelope_hash.clone(), envelope.intent.clone());
        let mut journal = Journal { writer, builder, entries: Vec::new() };

        journal
            .append(
                WalEntryKind::ExecutionStarted,
                &ExecutionStartedPayload {
                    envelope_hash,
                    intent: envelope.intent.to_string(),
                    strategy: envelope.routing.strategy.to_string(),
                    idempotency_key: envelope.idempotency_key.clone(),
                },
            )
            .await?;

        let response = match envelope.routing.strategy {
            RoutingStrategy::Direct => {
                self.run_direct(&mut journal, &mut envelope, contract, &candidates).await?
            }
            RoutingStrategy::Fallback => {
                self.run_fallback(&mut journal, &mut envelope, contract, &candidates).await?
            }
            RoutingStrategy::Broadcast => {
                self.run_broadcast(&mut journal, &mut envelope, contract, &candidates).await?
            }
            RoutingStrategy::Parallel => {
                self.run_parallel(&mut journal, &mut envelope, contract, &candidates).await?
            }
        };

        self.finish(execution_id, journal, envelope, response).await
    }

    //───────────────────── strategies ─────────────────────

    async fn run_direct(
        &self,
        journal: &mut Journal,
        envelope: &mut IntentEnvelope,
        contract: &ExecutionContract,
        candidates: &[Arc<dyn IntentAgent>],
    ) -> Result<AgentResponse> {
        let selected = match &envelope.routing.target_agent {
            Some(target) => match candidates.iter().find(|a| a.name() == target.as_str()) {
                Some(agent) => agent.clone(),
                None => {
                    return Ok(AgentResponse::failure(
                        ErrorInfo::new(
                            ErrorCode::RoutingError,
                            format!("target agent '{target}' is not registered for {}", envelope.intent),
                        )
                        .with_subtype("target_not_registered"),
                    ));
                }
            },
            None => candidates[0].clone(),
        };

        let step_id = step_id_for(1, selected.name());
        let side_effect = selected.side_effect(&envelope.intent);
        let mut ledger = StepLedger::new();
        self.attempt_step(journal, envelope, contract, &mut ledger, &selected, &step_id, side_effect)
            .await
    }

    async fn run_fallback(
        &self,
        journal: &mut Journal,
        envelope: &mut IntentEnvelope,
        contract: &ExecutionContract,
        candidates: &[Arc<dyn IntentAgent>],
    ) -> Result<AgentResponse> {
        let mut guard = FallbackChainGuard::new();
        let mut ledger = StepLedger::new();
        let mut last_failure: Option<AgentResponse> = None;
        let mut attempts: u32 = 0;

        for (index, agent) in candidates.iter().enumerate() {
            let side_effect = agent.side_effect(&envelope.intent);
            let admission = match guard.admit(side_effect) {
                Ok(admission) => admission,
                Err(error) => {
                    // An irreversible step already started; the chain ends here.
                    warn!(agent = agent.name(), "fallback stopped: {}", error.message);
                    journal
                        .append(
                            WalEntryKind::StepSkipped,
                            &StepFailedPayload {
                                step_id: step_id_for(index as u32 + 1, agent.name()),
                                agent: agent.name().to_string(),
                                error,
                            },
                        )
                        .await?;
                    break;
                }
            };
            if let Some(escalated_from) = admission.escalated_from {
                journal
                    .append(
                        WalEntryKind::ContractValidated,
                        &ContractValidatedPayload {
                            step_id: step_id_for(index as u32 + 1, agent.name()),
                            side_effect,
                            escalated_from: Some(escalated_from),
                        },
                    )
                    .await?;
            }

            let step_id = step_id_for(index as u32 + 1, agent.name());
            attempts += 1;
            let response = self
                .attempt_step(journal, envelope, contract, &mut ledger, agent, &step_id, side_effect)
                .await?;

            if response.is_success() {
                return Ok(response);
            }

            let recovery_allows = response
                .error
                .as_ref()
                .map(|e| e.recovery.allows_fallback())
                .unwrap_or(false);
            let has_next = index + 1 < candidates.len();
            if has_next && recovery_allows && guard.may_continue() {
                journal
                    .append(
                        WalEntryKind::FallbackTriggered,
                        &FallbackTriggeredPayload {
                            from_agent: agent.name().to_string(),
                            to_agent: candidates[index + 1].name().to_string(),
                            reason: response
                                .error
                                .as_ref()
                                .map(|e| e.code.to_string())
                                .unwrap_or_else(|| "unknown".to_string()),
                        },
                    )
                    .await?;
                last_failure = Some(response);
                continue;
            }

            last_failure = Some(response);
            break;
        }

        journal
            .append(WalEntryKind::FallbackExhausted, &FallbackExhaustedPayload { attempts })
            .await?;
        Ok(last_failure.unwrap_or_else(|| {
            AgentResponse::failure(ErrorInfo::new(
                ErrorCode::RoutingError,
                "no fallback candidate could be attempted",
            ))
        }))
    }

    async fn run_broadcast(
        &self,
        journal: &mut Journal,
        envelope: &mut IntentEnvelope,
        contract: &ExecutionContract,
        candidates: &[Arc<dyn IntentAgent>],
    ) -> Result<AgentResponse> {
        let mut ledger = StepLedger::new();
        let mut last_success: Option<AgentResponse> = None;
        let mut last_failure: Option<AgentResponse> = None;

        for (index, agent) in candidates.iter().enumerate() {
            let step_id = step_id_for(index as u32 + 1, agent.name());
            let side_effect = agent.side_effect(&envelope.intent);
            let response = self
                .attempt_step(journal, envelope, contract, &mut ledger, agent, &step_id, side_effect)
                .await?;
            if response.is_success() {
                last_success = Some(response);
            } else {
                last_failure = Some(response);
            }
        }

        Ok(last_success.or(last_failure).unwrap_or_else(|| {
            AgentResponse::failure(ErrorInfo::new(
                ErrorCode::RoutingError,
                "broadcast had no candidates to attempt",
            ))
        }))
    }

    async fn run_parallel(
        &self,
        journal: &mut Journal,
        envelope: &mut IntentEnvelope,
        contract: &ExecutionContract,
        candidates: &[Arc<dyn IntentAgent>],
    ) -> Result<AgentResponse> {
        let shared_envelope = Arc::new(envelope.clone());
        let (tx, mut rx) = mpsc::channel::<(usize, AgentResponse)>(candidates.len());

        // Launch order is deterministic: every step.started is journaled, in
        // candidate order, before its worker spawns.
        for (index, agent) in candidates.iter().enumerate() {
            let step_id = step_id_for(index as u32 + 1, agent.name());
            envelope.routing_metadata.decision_path.push(agent.name().to_string());
            journal
                .append(
                    WalEntryKind::StepStarted,
                    &StepStartedPayload {
                        step_id: step_id.clone(),
                        agent: agent.name().to_string(),
                        side_effect: agent.side_effect(&envelope.intent),
                        input_hash: hash_value(&Value::Object(envelope.payload.clone())),
                        timeout_ms: contract.timeout_ms,
                        attempt: 0,
                    },
                )
                .await?;

            let agent = agent.clone();
            let env = shared_envelope.clone();
            let tx = tx.clone();
            let timeout_ms = contract.timeout_ms;
            tokio::spawn(async move {
                let response = invoke_agent(&agent, &env, timeout_ms).await;
                let _ = tx.send((index, response)).await;
            });
        }
        drop(tx);

        // First success wins; the rest run to completion and are journaled,
        // then discarded. Completion order is inherently nondeterministic,
        // which is why determinism-requiring modes reject this strategy.
        let mut winner: Option<AgentResponse> = None;
        let mut last_failure: Option<AgentResponse> = None;
        while let Some((index, response)) = rx.recv().await {
            let agent_name = candidates[index].name().to_string();
            let step_id = step_id_for(index as u32 + 1, &agent_name);
            self.journal_step_result(journal, &step_id, &agent_name, envelope, &response).await?;
            if response.is_success() {
                if winner.is_none() {
                    winner = Some(response);
                }
            } else {
                last_failure = Some(response);
            }
        }

        Ok(winner.or(last_failure).unwrap_or_else(|| {
            AgentResponse::failure(ErrorInfo::new(
                ErrorCode::RoutingError,
                "parallel dispatch had no candidates to attempt",
            ))
        }))
    }

    //───────────────────── step execution ─────────────────────

    /// One candidate's step: journal `step.started`, invoke under the
    /// deadline, journal the outcome. Honors the contract's retry budget for
    /// retryable failures.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_step(
        &self,
        journal: &mut Journal,
        envelope: &mut IntentEnvelope,
        contract: &ExecutionContract,
        ledger: &mut StepLedger,
        agent: &Arc<dyn IntentAgent>,
        step_id: &str,
        side_effect: Option<SideEffectClass>,
    ) -> Result<AgentResponse> {
        if let Err(error) = ledger.check_attempt(contract, step_id) {
            return Ok(AgentResponse::failure(error));
        }

        // Opt-in schema validation: only capabilities that declare an input
        // schema gate the payload.
        if let Some(capability) = agent
            .definition()
            .capabilities
            .iter()
            .find(|c| c.intent == envelope.intent)
        {
            if let Err(error) = capability.validate_payload(&envelope.payload) {
                return Ok(AgentResponse::failure(error));
            }
        }

        envelope.routing_metadata.decision_path.push(agent.name().to_string());
        let input_hash = hash_value(&Value::Object(envelope.payload.clone()));

        let mut attempt: u32 = 0;
        loop {
            journal
                .append(
                    WalEntryKind::StepStarted,
                    &StepStartedPayload {
                        step_id: step_id.to_string(),
                        agent: agent.name().to_string(),
                        side_effect,
                        input_hash: input_hash.clone(),
                        timeout_ms: contract.timeout_ms,
                        attempt,
                    },
                )
                .await?;

            let response = invoke_agent(agent, envelope, contract.timeout_ms).await;
            self.journal_step_result(journal, step_id, agent.name(), envelope, &response).await?;

            if response.is_success() {
                ledger.record_completed(step_id);
                return Ok(response);
            }

            let retryable = response.error.as_ref().map(|e| e.retryable).unwrap_or(false);
            if retryable && !contract.no_retry && attempt < contract.max_retries {
                attempt += 1;
                debug!(step_id, attempt, "retrying step under contract");
                continue;
            }

            // An irreversible step that failed terminally is its own kind.
            if side_effect == Some(SideEffectClass::Irreversible) {
                let inner = response.error.clone().unwrap_or_else(|| {
                    ErrorInfo::new(ErrorCode::AgentError, "irreversible step failed")
                });
                return Ok(AgentResponse::failure(
                    ErrorInfo::new(
                        ErrorCode::IrreversibleStepFailed,
                        format!("irreversible step '{step_id}' failed terminally: {}", inner.message),
                    )
                    .with_detail("cause", serde_json::to_value(&inner)?),
                ));
            }
            return Ok(response);
        }
    }

    /// Journal the outcome of one finished attempt.
    async fn journal_step_result(
        &self,
        journal: &mut Journal,
        step_id: &str,
        agent_name: &str,
        envelope: &IntentEnvelope,
        response: &AgentResponse,
    ) -> Result<()> {
        if response.is_success() {
            journal
                .append(
                    WalEntryKind::StepCompleted,
                    &StepFinishedPayload {
                        step_id: step_id.to_string(),
                        agent: agent_name.to_string(),
                        output_hash: hash_encoded(&response.payload)?,
                    },
                )
                .await?;
            return Ok(());
        }

        let error = response
            .error
            .clone()
            .unwrap_or_else(|| ErrorInfo::new(ErrorCode::AgentError, "agent reported failure"));
        if error.is(ErrorCode::Timeout) {
            journal
                .append(
                    WalEntryKind::ContractViolated,
                    &ContractViolatedPayload {
                        step_id: Some(step_id.to_string()),
                        reason: "timeout_ms".to_string(),
                    },
                )
                .await?;
        }
        journal
            .append(
                WalEntryKind::StepFailed,
                &StepFailedPayload {
                    step_id: step_id.to_string(),
                    agent: agent_name.to_string(),
                    error: error.clone(),
                },
            )
            .await?;
        run_on_error(&self.hooks, envelope, &error).await;
        Ok(())
    }

    //───────────────────── exit paths ─────────────────────

    /// Reject before any WAL entry exists. The WAL file is never created.
    async fn reject_before_wal(
        &self,
        execution_id: Uuid,
        envelope: &IntentEnvelope,
        error: ErrorInfo,
    ) -> Result<RouteOutcome> {
        info!(code = %error.code, "rejected before journaling");
        run_on_error(&self.hooks, envelope, &error).await;
        let response = AgentResponse::failure(error);
        run_after(&self.hooks, envelope, &response).await;
        Ok(RouteOutcome { execution_id, response })
    }

    /// Write the terminal entry, finalize and persist the record.
    async fn finish(
        &self,
        execution_id: Uuid,
        mut journal: Journal,
        envelope: IntentEnvelope,
        mut response: AgentResponse,
    ) -> Result<RouteOutcome> {
        if let Some(policy) = &self.config.redaction {
            policy.apply(&mut response.payload);
            let mut metadata = Value::Object(std::mem::take(&mut response.metadata));
            policy.apply(&mut metadata);
            if let Value::Object(map) = metadata {
                response.metadata = map;
            }
        }

        let response_hash = hash_encoded(&response)?;
        let replayable = envelope.routing.strategy != RoutingStrategy::Parallel;

        if response.is_success() {
            let fingerprint = FingerprintEngine::compute(
                &envelope.intent,
                &journal.entries,
                &envelope.routing_metadata.decision_path,
            );
            journal
                .append(
                    WalEntryKind::ExecutionCompleted,
                    &ExecutionFinishedPayload {
                        response_hash,
                        error: None,
                        fingerprint: Some(fingerprint.digest()),
                    },
                )
                .await?;
        } else {
            journal
                .append(
                    WalEntryKind::ExecutionFailed,
                    &ExecutionFinishedPayload {
                        response_hash,
                        error: response.error.clone(),
                        fingerprint: None,
                    },
                )
                .await?;
            if let Some(error) = &response.error {
                run_on_error(&self.hooks, &envelope, error).await;
            }
        }

        let record = journal.builder.finalize(response.clone(), replayable)?;
        self.records.save(&record).await.context("failed to persist execution record")?;

        run_after(&self.hooks, &envelope, &response).await;
        info!(%execution_id, status = ?response.status, "execution finished");
        Ok(RouteOutcome { execution_id, response })
    }
}

//─────────────────────────────
//  Invocation wrapper
//─────────────────────────────

/// Invoke one agent under the contracted deadline, normalizing every failure
/// mode into a structured response: panics and `Err` returns become
/// `INTERNAL_AGENT_ERROR`, deadline expiry becomes `TIMEOUT`.
async fn invoke_agent(
    agent: &Arc<dyn IntentAgent>,
    envelope: &IntentEnvelope,
    timeout_ms: u64,
) -> AgentResponse {
    let guarded = std::panic::AssertUnwindSafe(agent.handle(envelope)).catch_unwind();
    match invoke_with_deadline(timeout_ms, guarded).await {
        Err(timeout) => AgentResponse::failure(timeout),
        Ok(Ok(Ok(mut response))) => {
            if response.status == ResponseStatus::Error && response.error.is_none() {
                response.error = Some(ErrorInfo::new(
                    ErrorCode::AgentError,
                    "agent reported failure without error details",
                ));
            }
            if response.is_success() && !response.metadata.contains_key("servingAgent") {
                response
                    .metadata
                    .insert("servingAgent".to_string(), Value::String(agent.name().to_string()));
            }
            response
        }
        Ok(Ok(Err(error))) => AgentResponse::failure(
            ErrorInfo::new(ErrorCode::InternalAgentError, format!("agent failed: {error:#}"))
                .with_detail("agent", Value::String(agent.name().to_string())),
        ),
        Ok(Err(_panic)) => AgentResponse::failure(
            ErrorInfo::new(ErrorCode::InternalAgentError, "agent panicked during invocation")
                .with_detail("agent", Value::String(agent.name().to_string())),
        ),
    }
}

fn step_id_for(position: u32, agent: &str) -> String {
    format!("step-{position}-{agent}")
}
