#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-runtime** – The composition layer.
//!
//! Builds the full runtime from a single configuration: hash and signing
//! primitives, the WAL directory, the registry, the router, the recorder,
//! retrieval, recovery, the idempotency index and execution locks. All state
//! is constructed at startup and passed by reference through this handle;
//! nothing lives in process-wide statics.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use intentusnet_hash::KeyRegistry;
use intentusnet_recorder::{RecordStore, RecorderResult, RetrievalEngine};
use intentusnet_registry::{AgentRegistry, IntentAgent, RegistryError};
use intentusnet_recovery::RecoveryManager;
use intentusnet_router::{IntentRouter, RouterConfig, RouterHook};
use intentusnet_types::{AgentResponse, ExecutionContract, IntentEnvelope};

mod config;
mod idempotency;
mod lock;

pub use config::{
    auth_token_from_env, auto_confirm_from_env, RuntimeConfig, RuntimeMode, DEFAULT_LOCK_TTL,
    ENV_AUTH_TOKEN, ENV_AUTO_CONFIRM, ENV_MODE,
};
pub use idempotency::{derive_key, IdempotencyError, IdempotencyIndex};
pub use lock::{ExecutionLock, LockError, LockInfo};

/// Envelope context key under which a caller may embed an execution contract.
pub const CONTRACT_CONTEXT_KEY: &str = "contract";

//─────────────────────────────
//  Submit outcome
//─────────────────────────────

/// What a submission produced.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The execution's id - an existing one on an idempotency hit.
    pub execution_id: Uuid,
    /// The final (or stored) response.
    pub response: AgentResponse,
    /// Whether the idempotency index short-circuited the submission.
    pub deduplicated: bool,
}

//─────────────────────────────
//  Runtime handle
//─────────────────────────────

/// The assembled IntentusNet runtime.
pub struct IntentusRuntime {
    config: RuntimeConfig,
    registry: Arc<AgentRegistry>,
    router: IntentRouter,
    retrieval: RetrievalEngine,
    recovery: RecoveryManager,
    idempotency: IdempotencyIndex,
    keys: Option<KeyRegistry>,
}

impl std::fmt::Debug for IntentusRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentusRuntime").finish_non_exhaustive()
    }
}

impl IntentusRuntime {
    /// Assemble a runtime, validating the compliance mode at startup.
    pub async fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_hooks(config, Vec::new()).await
    }

    /// Assemble a runtime with router middleware attached.
    pub async fn with_hooks(
        config: RuntimeConfig,
        hooks: Vec<Arc<dyn RouterHook>>,
    ) -> Result<Self> {
        config
            .ensure_layout()
            .await
            .with_context(|| format!("failed to create layout under {}", config.base_dir.display()))?;

        let registry = Arc::new(AgentRegistry::new());
        let keys = config.signer.as_ref().map(KeyRegistry::with_signer);

        let mut router = IntentRouter::new(
            RouterConfig {
                compliance: config.compliance,
                wal_dir: config.wal_dir(),
                records_dir: config.records_dir(),
                signer: config.signer.clone(),
                redaction: config.redaction.clone(),
            },
            registry.clone(),
        )
        .context("compliance validation failed at startup")?;
        for hook in hooks {
            router = router.with_hook(hook);
        }

        let retrieval = RetrievalEngine::new(RecordStore::new(config.records_dir()), config.wal_dir());
        let recovery = RecoveryManager::new(config.wal_dir(), keys.clone(), config.signer.clone());
        let idempotency = IdempotencyIndex::load(config.idempotency_index_path())
            .await
            .context("failed to load idempotency index")?;

        info!(
            base_dir = %config.base_dir.display(),
            compliance = %config.compliance,
            "IntentusNet runtime initialized"
        );

        Ok(Self { config, registry, router, retrieval, recovery, idempotency, keys })
    }

    /// Register an agent with the runtime's registry.
    pub async fn register_agent(&self, agent: Arc<dyn IntentAgent>) -> Result<(), RegistryError> {
        self.registry.register(agent).await
    }

    /// The runtime's registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The runtime's configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The recovery manager.
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// The verification key registry, when signing is configured.
    pub fn keys(&self) -> Option<&KeyRegistry> {
        self.keys.as_ref()
    }

    /// The record store the router persists into.
    pub fn record_store(&self) -> &RecordStore {
        self.router.record_store()
    }

    /// Submit one envelope for execution.
    ///
    /// When the envelope carries an idempotency key that the index already
    /// maps, the stored response is returned and no new execution begins.
    /// Otherwise a fresh execution id is allocated, the per-execution lock is
    /// taken, the envelope is routed, and on completion the key (if any) is
    /// durably bound to the execution id.
    pub async fn submit(&self, envelope: IntentEnvelope) -> Result<SubmitOutcome> {
        if let Some(key) = envelope.idempotency_key.clone() {
            if let Some(existing) = self.idempotency.get(&key).await {
                info!(%existing, key, "idempotency hit; returning stored execution");
                let response = self
                    .retrieval
                    .retrieve(existing, self.keys.as_ref())
                    .await
                    .context("stored execution could not be retrieved for idempotency hit")?;
                return Ok(SubmitOutcome { execution_id: existing, response, deduplicated: true });
            }
        }

        let execution_id = Uuid::new_v4();
        let lock = ExecutionLock::acquire(&self.config.locks_dir(), execution_id, self.config.lock_ttl)
            .await
            .context("failed to acquire execution lock")?;

        let contract = contract_from_envelope(&envelope)?;
        let outcome = self.router.route(execution_id, envelope.clone(), &contract).await;
        lock.release().await;
        let outcome = outcome?;

        if let Some(key) = &envelope.idempotency_key {
            self.idempotency
                .insert(key, execution_id)
                .await
                .context("failed to persist idempotency mapping")?;
        }

        Ok(SubmitOutcome { execution_id, response: outcome.response, deduplicated: false })
    }

    /// Return the stored response for a past execution. Pure lookup.
    pub async fn retrieve(&self, execution_id: Uuid) -> RecorderResult<AgentResponse> {
        self.retrieval.retrieve(execution_id, self.keys.as_ref()).await
    }

    /// Verify a record against its WAL without returning the response.
    pub async fn verify_record(
        &self,
        execution_id: Uuid,
    ) -> RecorderResult<intentusnet_recorder::ExecutionRecord> {
        self.retrieval.verify_record(execution_id, self.keys.as_ref()).await
    }
}

/// Extract the execution contract from the envelope's context, defaulting
/// when absent.
pub fn contract_from_envelope(envelope: &IntentEnvelope) -> Result<ExecutionContract> {
    match envelope.context.get(CONTRACT_CONTEXT_KEY) {
        Some(Value::Null) | None => Ok(ExecutionContract::default()),
        Some(value) => serde_json::from_value(value.clone())
            .context("envelope context carries a malformed execution contract"),
    }
}
