use serde_json::json;
use tempfile::tempdir;
use uuid::Uuid;

use intentusnet_hash::{Ed25519Signer, KeyRegistry};
use intentusnet_wal::{
    wal_path, IntegritySubtype, WalEntryKind, WalReader, WalWriter,
};

async fn write_sample_wal(dir: &std::path::Path, id: Uuid, signer: Option<Ed25519Signer>) {
    let mut writer = WalWriter::create(dir, id, signer).await.unwrap();
    writer
        .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": "abc"}))
        .await
        .unwrap();
    writer
        .append(WalEntryKind::StepStarted, json!({"stepId": "step-1", "agent": "A"}))
        .await
        .unwrap();
    writer
        .append(WalEntryKind::StepCompleted, json!({"stepId": "step-1", "agent": "A"}))
        .await
        .unwrap();
    writer
        .append(WalEntryKind::ExecutionCompleted, json!({"responseHash": "def"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn chain_is_contiguous_and_verifies() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    write_sample_wal(dir.path(), id, None).await;

    let outcome = WalReader::verify(&wal_path(dir.path(), id), None).await.unwrap();
    assert_eq!(outcome.entries.len(), 4);
    assert!(!outcome.truncated);
    assert!(outcome.has_terminal());

    // seq strictly monotonic from 1, chain linked entry by entry
    for (i, entry) in outcome.entries.iter().enumerate() {
        assert_eq!(entry.seq, i as u64 + 1);
        if i == 0 {
            assert!(entry.prev_hash.is_none());
        } else {
            assert_eq!(
                entry.prev_hash.as_deref(),
                Some(outcome.entries[i - 1].entry_hash.as_str())
            );
        }
    }
}

#[tokio::test]
async fn duplicate_wal_creation_is_rejected() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    let _writer = WalWriter::create(dir.path(), id, None).await.unwrap();

    let err = WalWriter::create(dir.path(), id, None).await.unwrap_err();
    assert!(matches!(err, intentusnet_wal::WalError::AlreadyExists(other) if other == id));
}

#[tokio::test]
async fn tampered_payload_fails_with_entry_hash_invalid_at_seq_2() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    write_sample_wal(dir.path(), id, None).await;

    // Flip one byte inside the second line's payload.
    let path = wal_path(dir.path(), id);
    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    lines[1] = lines[1].replace("step-1", "step-2");
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let err = WalReader::verify(&path, None).await.unwrap_err();
    match err {
        intentusnet_wal::WalError::Integrity { subtype, seq, .. } => {
            assert_eq!(subtype, IntegritySubtype::EntryHashInvalid);
            assert_eq!(seq, 2);
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[tokio::test]
async fn reordered_entries_break_the_chain() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    write_sample_wal(dir.path(), id, None).await;

    let path = wal_path(dir.path(), id);
    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    lines.swap(1, 2);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let err = WalReader::verify(&path, None).await.unwrap_err();
    assert_eq!(err.integrity_subtype(), Some(IntegritySubtype::SeqGap));
}

#[tokio::test]
async fn torn_final_line_reads_as_truncation() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    write_sample_wal(dir.path(), id, None).await;

    // Chop the file mid-way through the final line.
    let path = wal_path(dir.path(), id);
    let content = std::fs::read_to_string(&path).unwrap();
    let cut = content.len() - 25;
    std::fs::write(&path, &content[..cut]).unwrap();

    let outcome = WalReader::verify(&path, None).await.unwrap();
    assert!(outcome.truncated);
    assert_eq!(outcome.entries.len(), 3);
    assert_eq!(outcome.last().unwrap().seq, 3);
}

#[tokio::test]
async fn signed_entries_verify_and_detect_tampering() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    let signer = Ed25519Signer::generate("wal-key");
    let registry = KeyRegistry::with_signer(&signer);
    write_sample_wal(dir.path(), id, Some(signer)).await;

    let path = wal_path(dir.path(), id);
    let outcome = WalReader::verify(&path, Some(&registry)).await.unwrap();
    assert!(outcome.entries.iter().all(|e| e.signature.is_some()));

    // A signature made by an unknown key must fail verification.
    let other_registry = KeyRegistry::new();
    let err = WalReader::verify(&path, Some(&other_registry)).await.unwrap_err();
    assert_eq!(err.integrity_subtype(), Some(IntegritySubtype::SignatureInvalid));
}

#[tokio::test]
async fn reopen_continues_the_chain() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    {
        let mut writer = WalWriter::create(dir.path(), id, None).await.unwrap();
        writer
            .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": "abc"}))
            .await
            .unwrap();
        writer
            .append(WalEntryKind::StepStarted, json!({"stepId": "step-1"}))
            .await
            .unwrap();
    }

    let mut writer = WalWriter::reopen(dir.path(), id, None).await.unwrap();
    assert_eq!(writer.next_seq(), 3);
    writer
        .append(WalEntryKind::RecoveryStarted, json!({"state": "resuming"}))
        .await
        .unwrap();

    let outcome = WalReader::verify(&wal_path(dir.path(), id), None).await.unwrap();
    assert_eq!(outcome.entries.len(), 3);
    assert_eq!(outcome.last().unwrap().kind, WalEntryKind::RecoveryStarted);
}

#[tokio::test]
async fn in_flight_step_detection() {
    let dir = tempdir().unwrap();
    let id = Uuid::new_v4();
    let mut writer = WalWriter::create(dir.path(), id, None).await.unwrap();
    writer
        .append(WalEntryKind::ExecutionStarted, json!({"envelopeHash": "abc"}))
        .await
        .unwrap();
    writer
        .append(WalEntryKind::StepStarted, json!({"stepId": "step-1", "agent": "A"}))
        .await
        .unwrap();

    let outcome = WalReader::read(&wal_path(dir.path(), id)).await.unwrap();
    assert!(!outcome.has_terminal());
    let in_flight = outcome.in_flight_step().unwrap();
    assert_eq!(in_flight.payload["stepId"], json!("step-1"));
}
