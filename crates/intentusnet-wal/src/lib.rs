#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-wal** – Append-only, hash-chained write-ahead log.
//!
//! One JSONL file per execution id at `<wal_dir>/<execution_id>.wal`. Every
//! entry is hash-chained to its predecessor, optionally Ed25519-signed, and
//! fsynced before the append returns, so the log is always written *before*
//! the side effect it describes. The reader verifies sequence contiguity, the
//! hash chain and signatures, and tolerates a torn final line by treating the
//! file as truncated after the last valid entry.

use std::path::{Path, PathBuf};

use uuid::Uuid;

mod entry;
mod fsutil;
mod payload;
mod reader;
mod writer;

pub use entry::{WalEntry, WalEntryKind, WAL_VERSION};
pub use fsutil::{atomic_write, fsync_dir};
pub use payload::{
    ContractValidatedPayload, ContractViolatedPayload, ExecutionFinishedPayload,
    ExecutionStartedPayload, FallbackExhaustedPayload, FallbackTriggeredPayload,
    RecoveryFinishedPayload, RecoveryStartedPayload, StepFailedPayload, StepFinishedPayload,
    StepStartedPayload,
};
pub use reader::{WalReadOutcome, WalReader};
pub use writer::WalWriter;

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Integrity failure subtypes, stable identifiers surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegritySubtype {
    /// Sequence numbers are not contiguous from 1.
    SeqGap,
    /// An entry's `prevHash` does not match its predecessor's `entryHash`.
    HashChainBroken,
    /// An entry's recorded `entryHash` does not match its content.
    EntryHashInvalid,
    /// An entry's signature failed verification.
    SignatureInvalid,
}

impl IntegritySubtype {
    /// Stable wire identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SeqGap => "seq_gap",
            Self::HashChainBroken => "hash_chain_broken",
            Self::EntryHashInvalid => "entry_hash_invalid",
            Self::SignatureInvalid => "signature_invalid",
        }
    }
}

impl std::fmt::Display for IntegritySubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the WAL writer and reader.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// The hash chain, sequence, or a signature failed verification.
    #[error("WAL integrity error ({subtype}) at seq {seq}: {message}")]
    Integrity {
        /// Which invariant was broken.
        subtype: IntegritySubtype,
        /// Sequence number of the offending entry.
        seq: u64,
        /// Human-readable detail.
        message: String,
    },
    /// A WAL file already exists for the execution.
    #[error("WAL already exists for execution {0}")]
    AlreadyExists(Uuid),
    /// No WAL file exists for the execution.
    #[error("WAL not found: {0}")]
    NotFound(PathBuf),
    /// Underlying file I/O failed.
    #[error("WAL I/O error on '{path}': {source}")]
    Io {
        /// File the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An entry could not be serialized.
    #[error("failed to serialize WAL entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WalError {
    /// Create an integrity error with context.
    pub fn integrity(subtype: IntegritySubtype, seq: u64, message: impl Into<String>) -> Self {
        Self::Integrity { subtype, seq, message: message.into() }
    }

    /// Create an I/O error with file context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Whether this error is an integrity violation.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// The integrity subtype, if this is an integrity error.
    pub fn integrity_subtype(&self) -> Option<IntegritySubtype> {
        match self {
            Self::Integrity { subtype, .. } => Some(*subtype),
            _ => None,
        }
    }
}

/// Result alias for WAL operations.
pub type WalResult<T> = std::result::Result<T, WalError>;

//─────────────────────────────
//  Path layout
//─────────────────────────────

/// Path of the WAL file for `execution_id` under `wal_dir`.
pub fn wal_path(wal_dir: &Path, execution_id: Uuid) -> PathBuf {
    wal_dir.join(format!("{execution_id}.wal"))
}

/// Parse an execution id back out of a WAL file name.
pub fn execution_id_from_path(path: &Path) -> Option<Uuid> {
    path.file_name()
        .and_then(|f| f.to_str())
        .and_then(|f| f.strip_suffix(".wal"))
        .and_then(|stem| Uuid::parse_str(stem).ok())
}
