use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::Mutex;
use uuid::Uuid;

use intentusnet_hash::Ed25519Signer;
use intentusnet_registry::{AgentRegistry, IntentAgent};
use intentusnet_router::{IntentRouter, RedactionPolicy, RouterConfig, RouterHook};
use intentusnet_types::{
    AgentDefinition, AgentResponse, Capability, ComplianceMode, ErrorCode, ErrorInfo,
    ExecutionContract, IntentEnvelope, IntentRef, RoutingOptions, RoutingStrategy, SideEffectClass,
};
use intentusnet_wal::{wal_path, WalEntryKind, WalReader};

//─────────────────────────────
//  Configurable agent
//─────────────────────────────

enum Behavior {
    Sum,
    FailRetryable,
    FailTerminal,
    LeakPii,
}

struct Agent {
    definition: AgentDefinition,
    behavior: Behavior,
    side_effect: Option<SideEffectClass>,
    invocations: AtomicU32,
}

impl Agent {
    fn build(
        name: &str,
        priority: i64,
        behavior: Behavior,
        side_effect: Option<SideEffectClass>,
    ) -> Arc<Self> {
        let intent = IntentRef::new("sum", "1.0").unwrap();
        let mut definition =
            AgentDefinition::new(name, vec![Capability::for_intent(intent)]).unwrap();
        definition.node_priority = priority;
        Arc::new(Self { definition, behavior, side_effect, invocations: AtomicU32::new(0) })
    }

    fn with_schema(
        name: &str,
        priority: i64,
        behavior: Behavior,
        schema: Value,
    ) -> Arc<Self> {
        let intent = IntentRef::new("sum", "1.0").unwrap();
        let capability = Capability::for_intent(intent).with_input_schema(schema);
        let mut definition = AgentDefinition::new(name, vec![capability]).unwrap();
        definition.node_priority = priority;
        Arc::new(Self { definition, behavior, side_effect: None, invocations: AtomicU32::new(0) })
    }
}

#[async_trait]
impl IntentAgent for Agent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    fn side_effect(&self, _intent: &IntentRef) -> Option<SideEffectClass> {
        self.side_effect
    }

    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Sum => {
                let a = envelope.payload.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = envelope.payload.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(AgentResponse::success(json!({"sum": a + b})))
            }
            Behavior::FailRetryable => Ok(AgentResponse::failure(
                ErrorInfo::new(ErrorCode::AgentError, "transient failure").retryable(),
            )),
            Behavior::FailTerminal => Ok(AgentResponse::failure(ErrorInfo::new(
                ErrorCode::AgentError,
                "terminal failure",
            ))),
            Behavior::LeakPii => Ok(AgentResponse::success(
                json!({"sum": 42, "ssn": "123-45-6789"}),
            )),
        }
    }
}

fn envelope(strategy: RoutingStrategy) -> IntentEnvelope {
    IntentEnvelope::new(
        IntentRef::new("sum", "1.0").unwrap(),
        RoutingOptions::strategy(strategy),
    )
    .with_payload_entry("a", json!(17))
    .with_payload_entry("b", json!(25))
}

async fn registry_of(agents: Vec<Arc<Agent>>) -> Arc<AgentRegistry> {
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent).await.unwrap();
    }
    registry
}

fn dev_router(base: &std::path::Path, registry: Arc<AgentRegistry>) -> IntentRouter {
    IntentRouter::new(
        RouterConfig {
            compliance: ComplianceMode::Development,
            wal_dir: base.join("wal"),
            records_dir: base.join("records"),
            signer: None,
            redaction: None,
        },
        registry,
    )
    .unwrap()
}

//─────────────────────────────
//  Retry budget
//─────────────────────────────

#[tokio::test]
async fn retryable_failures_consume_the_retry_budget() {
    let dir = tempdir().unwrap();
    let flaky = Agent::build("flaky", 1, Behavior::FailRetryable, None);
    let router = dev_router(dir.path(), registry_of(vec![flaky.clone()]).await);

    let contract = ExecutionContract { max_retries: 2, ..Default::default() };
    let id = Uuid::new_v4();
    let outcome = router.route(id, envelope(RoutingStrategy::Direct), &contract).await.unwrap();

    assert!(!outcome.response.is_success());
    assert_eq!(flaky.invocations.load(Ordering::SeqCst), 3); // initial + 2 retries

    let wal = WalReader::verify(&wal_path(&dir.path().join("wal"), id), None).await.unwrap();
    let attempts: Vec<u64> = wal
        .entries
        .iter()
        .filter(|e| e.kind == WalEntryKind::StepStarted)
        .filter_map(|e| e.payload.get("attempt").and_then(Value::as_u64))
        .collect();
    assert_eq!(attempts, vec![0, 1, 2]);
}

#[tokio::test]
async fn no_retry_contract_stops_after_one_attempt() {
    let dir = tempdir().unwrap();
    let flaky = Agent::build("flaky", 1, Behavior::FailRetryable, None);
    let router = dev_router(dir.path(), registry_of(vec![flaky.clone()]).await);

    let contract = ExecutionContract { no_retry: true, ..Default::default() };
    let id = Uuid::new_v4();
    router.route(id, envelope(RoutingStrategy::Direct), &contract).await.unwrap();
    assert_eq!(flaky.invocations.load(Ordering::SeqCst), 1);
}

//─────────────────────────────
//  Irreversible fallback rules
//─────────────────────────────

#[tokio::test]
async fn failed_irreversible_step_ends_the_fallback_chain() {
    let dir = tempdir().unwrap();
    let burner = Agent::build("burner", 1, Behavior::FailTerminal, Some(SideEffectClass::Irreversible));
    let backup = Agent::build("backup", 2, Behavior::Sum, None);
    let router = dev_router(dir.path(), registry_of(vec![burner, backup.clone()]).await);

    let id = Uuid::new_v4();
    let outcome = router
        .route(id, envelope(RoutingStrategy::Fallback), &ExecutionContract::default())
        .await
        .unwrap();

    let error = outcome.response.error.unwrap();
    assert!(error.is(ErrorCode::IrreversibleStepFailed));
    assert_eq!(backup.invocations.load(Ordering::SeqCst), 0);

    // No step entry for the backup candidate exists anywhere in the journal.
    let wal = WalReader::verify(&wal_path(&dir.path().join("wal"), id), None).await.unwrap();
    assert!(wal
        .entries
        .iter()
        .all(|e| e.payload.get("agent").and_then(Value::as_str) != Some("backup")));
}

#[tokio::test]
async fn side_effect_escalation_is_journaled() {
    let dir = tempdir().unwrap();
    let reader = Agent::build("reader", 1, Behavior::FailRetryable, Some(SideEffectClass::ReadOnly));
    let burner = Agent::build("writer", 2, Behavior::Sum, Some(SideEffectClass::Irreversible));
    let router = dev_router(dir.path(), registry_of(vec![reader, burner]).await);

    let id = Uuid::new_v4();
    let outcome = router
        .route(id, envelope(RoutingStrategy::Fallback), &ExecutionContract::default())
        .await
        .unwrap();
    assert!(outcome.response.is_success());

    let wal = WalReader::verify(&wal_path(&dir.path().join("wal"), id), None).await.unwrap();
    let validated = wal
        .entries
        .iter()
        .find(|e| e.kind == WalEntryKind::ContractValidated)
        .expect("escalation must journal contract.validated");
    assert_eq!(validated.payload["escalatedFrom"], json!("READ_ONLY"));
    assert_eq!(validated.payload["sideEffect"], json!("IRREVERSIBLE"));
}

//─────────────────────────────
//  Schema gating
//─────────────────────────────

#[tokio::test]
async fn schema_mismatch_falls_through_to_schemaless_candidate() {
    let dir = tempdir().unwrap();
    let strict = Agent::with_schema(
        "strict",
        1,
        Behavior::Sum,
        json!({"required": ["a", "b", "c"]}),
    );
    let lenient = Agent::build("lenient", 2, Behavior::Sum, None);
    let router = dev_router(dir.path(), registry_of(vec![strict.clone(), lenient]).await);

    let id = Uuid::new_v4();
    let outcome = router
        .route(id, envelope(RoutingStrategy::Fallback), &ExecutionContract::default())
        .await
        .unwrap();

    assert!(outcome.response.is_success());
    // The strict agent was never invoked; the gate fired before its step.
    assert_eq!(strict.invocations.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.response.metadata["servingAgent"], json!("lenient"));
}

//─────────────────────────────
//  Redaction
//─────────────────────────────

#[tokio::test]
async fn regulated_mode_redacts_persisted_responses() {
    let dir = tempdir().unwrap();
    let leaky = Agent::build("leaky", 1, Behavior::LeakPii, None);
    let signer = Ed25519Signer::generate("reg-key");
    let router = IntentRouter::new(
        RouterConfig {
            compliance: ComplianceMode::Regulated,
            wal_dir: dir.path().join("wal"),
            records_dir: dir.path().join("records"),
            signer: Some(signer),
            redaction: Some(RedactionPolicy::new(["ssn"])),
        },
        registry_of(vec![leaky]).await,
    )
    .unwrap();

    let id = Uuid::new_v4();
    let outcome = router
        .route(id, envelope(RoutingStrategy::Direct), &ExecutionContract::default())
        .await
        .unwrap();

    assert_eq!(outcome.response.payload["ssn"], json!("[REDACTED]"));
    assert_eq!(outcome.response.payload["sum"], json!(42));

    // The persisted record carries the redacted form too.
    let record = router.record_store().load(id).await.unwrap();
    assert_eq!(record.response.payload["ssn"], json!("[REDACTED]"));
}

//─────────────────────────────
//  Hooks
//─────────────────────────────

#[derive(Default)]
struct CountingHook {
    before: AtomicU32,
    after: AtomicU32,
    errors: Mutex<Vec<ErrorCode>>,
}

#[async_trait]
impl RouterHook for CountingHook {
    fn name(&self) -> &str {
        "counting"
    }

    async fn before_route(&self, _envelope: &mut IntentEnvelope) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn after_route(&self, _envelope: &IntentEnvelope, _response: &AgentResponse) -> Result<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_error(&self, _envelope: &IntentEnvelope, error: &ErrorInfo) -> Result<()> {
        self.errors.lock().await.push(error.code);
        Ok(())
    }
}

struct FailingHook;

#[async_trait]
impl RouterHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn before_route(&self, _envelope: &mut IntentEnvelope) -> Result<()> {
        anyhow::bail!("hook blew up")
    }
}

#[tokio::test]
async fn hooks_observe_routing_and_failures_never_interrupt_it() {
    let dir = tempdir().unwrap();
    let counting = Arc::new(CountingHook::default());
    let router = dev_router(
        dir.path(),
        registry_of(vec![
            Agent::build("fails", 1, Behavior::FailRetryable, None),
            Agent::build("works", 2, Behavior::Sum, None),
        ])
        .await,
    )
    .with_hook(counting.clone())
    .with_hook(Arc::new(FailingHook));

    let id = Uuid::new_v4();
    let outcome = router
        .route(id, envelope(RoutingStrategy::Fallback), &ExecutionContract::default())
        .await
        .unwrap();

    // The failing hook did not interrupt routing.
    assert!(outcome.response.is_success());
    assert_eq!(counting.before.load(Ordering::SeqCst), 1);
    assert_eq!(counting.after.load(Ordering::SeqCst), 1);
    assert_eq!(*counting.errors.lock().await, vec![ErrorCode::AgentError]);
}
