use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;
use uuid::Uuid;

use intentusnet_recovery::{
    BlockReason, RecoveryDecision, RecoveryError, RecoveryManager, RecoveryOutcome,
};
use intentusnet_registry::{AgentRegistry, IntentAgent};
use intentusnet_types::{
    AgentDefinition, AgentResponse, Capability, IntentEnvelope, IntentRef, SideEffectClass,
};
use intentusnet_wal::{wal_path, WalEntryKind, WalReader, WalWriter};

//─────────────────────────────
//  Fixtures
//─────────────────────────────

/// Write a WAL that crashed right after `step.started`.
async fn crashed_wal(
    dir: &std::path::Path,
    id: Uuid,
    agent: &str,
    side_effect: Option<SideEffectClass>,
) {
    let mut writer = WalWriter::create(dir, id, None).await.unwrap();
    writer
        .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": "e", "intent": "burn/1.0"}))
        .await
        .unwrap();
    let mut payload = json!({"stepId": "step-1", "agent": agent, "inputHash": "i", "timeoutMs": 1000});
    if let Some(class) = side_effect {
        payload["sideEffect"] = serde_json::to_value(class).unwrap();
    }
    writer.append(WalEntryKind::StepStarted, payload).await.unwrap();
}

struct CompensatingAgent {
    definition: AgentDefinition,
    compensated: Arc<AtomicBool>,
    has_hook: bool,
}

impl CompensatingAgent {
    fn build(name: &str, has_hook: bool) -> (Arc<Self>, Arc<AtomicBool>) {
        let compensated = Arc::new(AtomicBool::new(false));
        let intent = IntentRef::new("burn", "1.0").unwrap();
        let agent = Arc::new(Self {
            definition: AgentDefinition::new(name, vec![Capability::for_intent(intent)]).unwrap(),
            compensated: compensated.clone(),
            has_hook,
        });
        (agent, compensated)
    }
}

#[async_trait]
impl IntentAgent for CompensatingAgent {
    fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    async fn handle(&self, _envelope: &IntentEnvelope) -> Result<AgentResponse> {
        Ok(AgentResponse::success(serde_json::Value::Null))
    }

    fn has_compensation(&self) -> bool {
        self.has_hook
    }

    async fn compensate(&self, _step_id: &str) -> Result<()> {
        self.compensated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

//─────────────────────────────
//  Scan classification
//─────────────────────────────

#[tokio::test]
async fn irreversible_in_flight_blocks() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "burner", Some(SideEffectClass::Irreversible)).await;

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();

    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].execution_id, id);
    assert_eq!(
        incomplete[0].decision,
        RecoveryDecision::Block { reason: BlockReason::IrreversibleInFlight }
    );
}

#[tokio::test]
async fn read_only_and_reversible_resume() {
    let dir = tempdir().unwrap();
    let read_only = Uuid::new_v4();
    let reversible = Uuid::new_v4();
    crashed_wal(dir.path(), read_only, "reader", Some(SideEffectClass::ReadOnly)).await;
    crashed_wal(dir.path(), reversible, "undoer", Some(SideEffectClass::Reversible)).await;

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();

    assert_eq!(incomplete.len(), 2);
    for found in &incomplete {
        assert_eq!(
            found.decision,
            RecoveryDecision::Resume { from_step: Some("step-1".into()) }
        );
    }
}

#[tokio::test]
async fn unclassified_side_effect_blocks_conservatively() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "mystery", None).await;

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();
    assert_eq!(
        incomplete[0].decision,
        RecoveryDecision::Block { reason: BlockReason::UnclassifiedSideEffect }
    );
}

#[tokio::test]
async fn corrupted_wal_blocks_with_wal_corrupted() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "reader", Some(SideEffectClass::ReadOnly)).await;

    // Flip payload bytes in the first line.
    let path = wal_path(dir.path(), id);
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("burn/1.0", "liar/9.9")).unwrap();

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();
    assert_eq!(
        incomplete[0].decision,
        RecoveryDecision::Block { reason: BlockReason::WalCorrupted }
    );
}

#[tokio::test]
async fn terminal_wals_are_not_incomplete() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    let mut writer = WalWriter::create(dir.path(), id, None).await.unwrap();
    writer
        .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": "e"}))
        .await
        .unwrap();
    writer
        .append(WalEntryKind::ExecutionCompleted, json!({"responseHash": "r"}))
        .await
        .unwrap();

    let manager = RecoveryManager::new(dir.path(), None, None);
    assert!(manager.scan().await.unwrap().is_empty());
}

//─────────────────────────────
//  Acting on decisions
//─────────────────────────────

#[tokio::test]
async fn resume_compensates_reversible_steps() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "undoer", Some(SideEffectClass::Reversible)).await;

    let registry = AgentRegistry::new();
    let (agent, compensated) = CompensatingAgent::build("undoer", true);
    registry.register(agent).await.unwrap();

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();
    let outcome = manager.resume(&incomplete[0], &registry).await.unwrap();

    assert_eq!(outcome, RecoveryOutcome::Compensated);
    assert!(compensated.load(Ordering::SeqCst));

    // The WAL is now terminal and verifies end to end.
    let wal = WalReader::verify(&wal_path(dir.path(), id), None).await.unwrap();
    assert!(wal.has_terminal());
    let kinds: Vec<WalEntryKind> = wal.entries.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&WalEntryKind::RecoveryStarted));
    assert!(kinds.contains(&WalEntryKind::RecoveryCompleted));
}

#[tokio::test]
async fn resume_without_compensation_hook_blocks() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "undoer", Some(SideEffectClass::Reversible)).await;

    let registry = AgentRegistry::new();
    let (agent, _) = CompensatingAgent::build("undoer", false);
    registry.register(agent).await.unwrap();

    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();
    let err = manager.resume(&incomplete[0], &registry).await.unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::Blocked { reason: BlockReason::NoCompensationHook, .. }
    ));
}

#[tokio::test]
async fn resume_refuses_blocked_executions() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "burner", Some(SideEffectClass::Irreversible)).await;

    let registry = AgentRegistry::new();
    let manager = RecoveryManager::new(dir.path(), None, None);
    let incomplete = manager.scan().await.unwrap();
    let err = manager.resume(&incomplete[0], &registry).await.unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::Blocked { reason: BlockReason::IrreversibleInFlight, .. }
    ));

    // The irreversible step is never re-executed; the WAL still has no
    // completion for it.
    let wal = WalReader::read(&wal_path(dir.path(), id)).await.unwrap();
    assert!(wal.in_flight_step().is_some());
}

#[tokio::test]
async fn abort_closes_an_incomplete_execution() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "reader", Some(SideEffectClass::ReadOnly)).await;

    let manager = RecoveryManager::new(dir.path(), None, None);
    let outcome = manager.abort(id).await.unwrap();
    assert_eq!(outcome, RecoveryOutcome::Aborted);

    let wal = WalReader::verify(&wal_path(dir.path(), id), None).await.unwrap();
    assert!(wal.has_terminal());

    // A second abort refuses: the execution is no longer incomplete.
    let err = manager.abort(id).await.unwrap_err();
    assert!(matches!(err, RecoveryError::NotIncomplete(_)));
}

#[tokio::test]
async fn mark_blocked_is_idempotent() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    crashed_wal(dir.path(), id, "burner", Some(SideEffectClass::Irreversible)).await;

    let manager = RecoveryManager::new(dir.path(), None, None);
    manager.mark_blocked(id, BlockReason::IrreversibleInFlight).await.unwrap();
    manager.mark_blocked(id, BlockReason::IrreversibleInFlight).await.unwrap();

    let wal = WalReader::read(&wal_path(dir.path(), id)).await.unwrap();
    let blocked_entries = wal
        .entries
        .iter()
        .filter(|e| e.kind == WalEntryKind::RecoveryStarted)
        .count();
    assert_eq!(blocked_entries, 1);
}
