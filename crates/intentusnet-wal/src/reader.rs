//! The verifying read side of the WAL.
//!
//! Readers open the file read-only and tolerate concurrent appends by
//! reading up to the current length. A torn final line (crash mid-append)
//! parses as truncation, never as corruption; everything before it must
//! still verify.

use std::path::Path;

use tokio::fs;
use tracing::warn;

use intentusnet_hash::KeyRegistry;

use crate::entry::{WalEntry, WalEntryKind};
use crate::{IntegritySubtype, WalError, WalResult};

/// Result of reading one WAL file.
#[derive(Debug, Clone)]
pub struct WalReadOutcome {
    /// Entries in file order.
    pub entries: Vec<WalEntry>,
    /// Whether a torn final line was dropped.
    pub truncated: bool,
}

impl WalReadOutcome {
    /// Last entry, if any.
    pub fn last(&self) -> Option<&WalEntry> {
        self.entries.last()
    }

    /// Whether the log ends in a terminal execution entry.
    pub fn has_terminal(&self) -> bool {
        self.entries.iter().any(|e| e.kind.is_terminal())
    }

    /// First entry of the given kind.
    pub fn first_of(&self, kind: WalEntryKind) -> Option<&WalEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// The last `step.started` entry with no matching `step.completed`,
    /// `step.failed` or `step.skipped` after it. This is the "in-flight"
    /// step crash recovery classifies.
    pub fn in_flight_step(&self) -> Option<&WalEntry> {
        let mut in_flight: Option<&WalEntry> = None;
        for entry in &self.entries {
            match entry.kind {
                WalEntryKind::StepStarted => in_flight = Some(entry),
                WalEntryKind::StepCompleted
                | WalEntryKind::StepFailed
                | WalEntryKind::StepSkipped => in_flight = None,
                _ => {}
            }
        }
        in_flight
    }
}

/// Reads and verifies execution WAL files.
pub struct WalReader;

impl WalReader {
    /// Read entries without integrity verification.
    ///
    /// Used where the caller either trusts the file (the writer reopening its
    /// own log) or will verify separately. Torn final lines are dropped and
    /// reported via `truncated`.
    pub async fn read(path: &Path) -> WalResult<WalReadOutcome> {
        if !fs::try_exists(path).await.map_err(|e| WalError::io(path, e))? {
            return Err(WalError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read(path).await.map_err(|e| WalError::io(path, e))?;

        let mut entries = Vec::new();
        let mut truncated = false;
        for line in raw.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<WalEntry>(line) {
                Ok(entry) if !entry.entry_hash.is_empty() => entries.push(entry),
                Ok(_) | Err(_) => {
                    // Torn write: stop at the last valid entry.
                    warn!(path = %path.display(), after_seq = entries.len(), "WAL truncated at torn line");
                    truncated = true;
                    break;
                }
            }
        }
        Ok(WalReadOutcome { entries, truncated })
    }

    /// Read entries and verify sequence contiguity, the hash chain, entry
    /// hashes and (when a key registry is supplied) signatures.
    pub async fn verify(path: &Path, keys: Option<&KeyRegistry>) -> WalResult<WalReadOutcome> {
        let outcome = Self::read(path).await?;
        Self::verify_entries(&outcome.entries, keys)?;
        Ok(outcome)
    }

    /// Verify an already-loaded entry sequence.
    pub fn verify_entries(entries: &[WalEntry], keys: Option<&KeyRegistry>) -> WalResult<()> {
        let mut prev: Option<&WalEntry> = None;
        for entry in entries {
            let expected_seq = prev.map(|p| p.seq + 1).unwrap_or(1);
            if entry.seq != expected_seq {
                return Err(WalError::integrity(
                    IntegritySubtype::SeqGap,
                    entry.seq,
                    format!("expected seq {expected_seq}, found {}", entry.seq),
                ));
            }

            match (prev, entry.prev_hash.as_deref()) {
                (None, None) => {}
                (None, Some(_)) => {
                    return Err(WalError::integrity(
                        IntegritySubtype::HashChainBroken,
                        entry.seq,
                        "first entry must not carry a prevHash",
                    ));
                }
                (Some(_), None) => {
                    return Err(WalError::integrity(
                        IntegritySubtype::HashChainBroken,
                        entry.seq,
                        "missing prevHash",
                    ));
                }
                (Some(p), Some(prev_hash)) => {
                    if prev_hash != p.entry_hash {
                        return Err(WalError::integrity(
                            IntegritySubtype::HashChainBroken,
                            entry.seq,
                            "prevHash does not match predecessor entryHash",
                        ));
                    }
                }
            }

            let computed = entry.computed_hash();
            if computed != entry.entry_hash {
                return Err(WalError::integrity(
                    IntegritySubtype::EntryHashInvalid,
                    entry.seq,
                    format!("recorded {} != computed {computed}", entry.entry_hash),
                ));
            }

            if let (Some(registry), Some(signature)) = (keys, entry.signature.as_deref()) {
                let key_id = entry.signer_key_id.as_deref().unwrap_or_default();
                registry
                    .verify(key_id, &entry.signable_bytes(), signature)
                    .map_err(|e| {
                        WalError::integrity(IntegritySubtype::SignatureInvalid, entry.seq, e.to_string())
                    })?;
            }

            prev = Some(entry);
        }
        Ok(())
    }
}
