#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-recorder** – Immutable execution records and retrieval.
//!
//! The recorder is invoked alongside every WAL append and accumulates an
//! in-memory [`ExecutionRecord`]. When the execution completes the record is
//! finalized - content hash computed, marked immutable - and persisted with
//! an atomic temp-file-rename write. Retrieval returns the stored response
//! by execution id after verifying the record against its WAL; no agent is
//! ever re-invoked.

use std::path::PathBuf;

use uuid::Uuid;

mod fingerprint;
mod record;
mod retrieval;
mod store;

pub use fingerprint::{detect_drift, ExecutionFingerprint, FingerprintEngine};
pub use record::{ExecutionRecord, RecordBuilder, RecordEvent};
pub use retrieval::RetrievalEngine;
pub use store::RecordStore;

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors produced by the recorder, store and retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// No record exists for the execution.
    #[error("execution record not found: {0}")]
    NotFound(Uuid),
    /// The record contradicts itself or its WAL.
    #[error("record consistency violation for {execution_id}: {reason}")]
    Consistency {
        /// Execution whose record failed the check.
        execution_id: Uuid,
        /// Which cross-check failed.
        reason: String,
    },
    /// A finalized record was asked to change.
    #[error("record for {0} is finalized and immutable")]
    Finalized(Uuid),
    /// Underlying WAL read or verification failed.
    #[error(transparent)]
    Wal(#[from] intentusnet_wal::WalError),
    /// File I/O failed.
    #[error("record I/O error on '{path}': {source}")]
    Io {
        /// File the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Record (de)serialization failed.
    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecorderError {
    /// Create a consistency violation with context.
    pub fn consistency(execution_id: Uuid, reason: impl Into<String>) -> Self {
        Self::Consistency { execution_id, reason: reason.into() }
    }

    /// Create an I/O error with file context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Whether this is the `consistency_violation` failure kind.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

/// Result alias for recorder operations.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
