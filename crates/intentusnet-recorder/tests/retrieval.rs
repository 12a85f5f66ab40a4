use serde_json::json;
use tempfile::tempdir;
use uuid::Uuid;

use intentusnet_hash::hash_value;
use intentusnet_recorder::{RecordBuilder, RecordStore, RecorderError, RetrievalEngine};
use intentusnet_types::{AgentResponse, IntentRef};
use intentusnet_wal::{WalEntryKind, WalWriter};

/// Build a consistent WAL + record pair for one completed execution.
async fn seeded_execution(base: &std::path::Path) -> (Uuid, RetrievalEngine, AgentResponse) {
    let wal_dir = base.join("wal");
    let records = RecordStore::new(base.join("records"));
    let id = Uuid::new_v4();

    let envelope_hash = hash_value(&json!({"intent": "sum/1.0", "payload": {"a": 17, "b": 25}}));
    let response = AgentResponse::success(json!({"sum": 42}));

    let mut writer = WalWriter::create(&wal_dir, id, None).await.unwrap();
    let mut builder =
        RecordBuilder::new(id, envelope_hash.clone(), IntentRef::new("sum", "1.0").unwrap());

    let entry = writer
        .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": envelope_hash}))
        .await
        .unwrap();
    builder.observe(&entry).unwrap();

    let entry = writer
        .append(
            WalEntryKind::StepStarted,
            json!({"stepId": "step-1-adder", "agent": "adder", "inputHash": "i", "timeoutMs": 1000}),
        )
        .await
        .unwrap();
    builder.observe(&entry).unwrap();

    let entry = writer
        .append(
            WalEntryKind::StepCompleted,
            json!({"stepId": "step-1-adder", "agent": "adder", "outputHash": "o"}),
        )
        .await
        .unwrap();
    builder.observe(&entry).unwrap();

    let entry = writer
        .append(WalEntryKind::ExecutionCompleted, json!({"responseHash": "r"}))
        .await
        .unwrap();
    builder.observe(&entry).unwrap();

    let record = builder.finalize(response.clone(), true).unwrap();
    records.save(&record).await.unwrap();

    let engine = RetrievalEngine::new(records, wal_dir);
    (id, engine, response)
}

#[tokio::test]
async fn retrieval_returns_the_stored_response() {
    let dir = tempdir().unwrap();
    let (id, engine, expected) = seeded_execution(dir.path()).await;

    let response = engine.retrieve(id, None).await.unwrap();
    assert_eq!(response, expected);
}

#[tokio::test]
async fn retrieval_of_unknown_execution_is_not_found() {
    let dir = tempdir().unwrap();
    let (_, engine, _) = seeded_execution(dir.path()).await;

    let err = engine.retrieve(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, RecorderError::NotFound(_)));
}

#[tokio::test]
async fn envelope_hash_mismatch_is_a_consistency_violation() {
    let dir = tempdir().unwrap();
    let (id, engine, _) = seeded_execution(dir.path()).await;

    // Rewrite the record with a different envelope hash but a valid record
    // hash, so only the WAL cross-check can catch it.
    let store = RecordStore::new(dir.path().join("records"));
    let mut record = store.load(id).await.unwrap();
    record.envelope_hash = "0".repeat(64);
    record.record_hash = record.computed_hash().unwrap();
    store.save(&record).await.unwrap();

    let err = engine.retrieve(id, None).await.unwrap_err();
    assert!(err.is_consistency_violation());
}

#[tokio::test]
async fn record_event_without_wal_step_is_a_consistency_violation() {
    let dir = tempdir().unwrap();
    let (id, engine, _) = seeded_execution(dir.path()).await;

    // Forge an extra completed-step event the WAL never saw.
    let store = RecordStore::new(dir.path().join("records"));
    let mut record = store.load(id).await.unwrap();
    let mut forged = record.events.last().unwrap().clone();
    forged.kind = WalEntryKind::StepCompleted;
    forged.step_id = Some("step-9-ghost".into());
    record.events.push(forged);
    record.record_hash = record.computed_hash().unwrap();
    store.save(&record).await.unwrap();

    let err = engine.retrieve(id, None).await.unwrap_err();
    assert!(err.is_consistency_violation());
}

#[tokio::test]
async fn missing_record_event_for_wal_step_is_a_consistency_violation() {
    let dir = tempdir().unwrap();
    let (id, engine, _) = seeded_execution(dir.path()).await;

    // Drop the completed-step event from the record.
    let store = RecordStore::new(dir.path().join("records"));
    let mut record = store.load(id).await.unwrap();
    record.events.retain(|e| e.kind != WalEntryKind::StepCompleted);
    record.record_hash = record.computed_hash().unwrap();
    store.save(&record).await.unwrap();

    let err = engine.retrieve(id, None).await.unwrap_err();
    assert!(err.is_consistency_violation());
}

#[tokio::test]
async fn tampered_record_hash_is_caught_before_the_wal_is_read() {
    let dir = tempdir().unwrap();
    let (id, engine, _) = seeded_execution(dir.path()).await;

    let store = RecordStore::new(dir.path().join("records"));
    let mut record = store.load(id).await.unwrap();
    record.response = AgentResponse::success(json!({"sum": 1337}));
    // Keep the stale hash: verification must notice.
    store.save(&record).await.unwrap();

    let err = engine.retrieve(id, None).await.unwrap_err();
    assert!(err.is_consistency_violation());
}
