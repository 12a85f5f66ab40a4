//! Runtime configuration and the environment contract.

use std::path::{Path, PathBuf};
use std::time::Duration;

use intentusnet_hash::Ed25519Signer;
use intentusnet_router::RedactionPolicy;
use intentusnet_types::ComplianceMode;

/// Environment variable carrying the opaque auth token for destructive ops.
pub const ENV_AUTH_TOKEN: &str = "INTENTUSNET_AUTH_TOKEN";
/// Environment variable selecting read_write / read_only operation.
pub const ENV_MODE: &str = "INTENTUSNET_MODE";
/// Environment variable that skips interactive confirmation when set to `1`.
pub const ENV_AUTO_CONFIRM: &str = "INTENTUSNET_AUTO_CONFIRM";

/// Default TTL after which a lock with a dead or silent owner is reclaimed.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

//─────────────────────────────
//  Operating mode
//─────────────────────────────

/// Whether destructive operations are permitted this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Full read/write operation.
    ReadWrite,
    /// Introspection only; mutating operations are refused.
    ReadOnly,
}

impl RuntimeMode {
    /// Resolve from `INTENTUSNET_MODE`; anything but `read_only` is read/write.
    pub fn from_env() -> Self {
        match std::env::var(ENV_MODE).as_deref() {
            Ok("read_only") => Self::ReadOnly,
            _ => Self::ReadWrite,
        }
    }
}

/// The configured auth token, if any. When set, destructive operations must
/// present it.
pub fn auth_token_from_env() -> Option<String> {
    std::env::var(ENV_AUTH_TOKEN).ok().filter(|t| !t.is_empty())
}

/// Whether interactive confirmation is skipped.
pub fn auto_confirm_from_env() -> bool {
    std::env::var(ENV_AUTO_CONFIRM).as_deref() == Ok("1")
}

//─────────────────────────────
//  Runtime configuration
//─────────────────────────────

/// Runtime construction parameters.
pub struct RuntimeConfig {
    /// Base directory holding `wal/`, `records/`, `locks/` and `idempotency/`.
    pub base_dir: PathBuf,
    /// Enforcement posture, validated at startup.
    pub compliance: ComplianceMode,
    /// Stale-lock reclamation threshold.
    pub lock_ttl: Duration,
    /// WAL signer; mandatory under REGULATED.
    pub signer: Option<Ed25519Signer>,
    /// PII redaction policy; mandatory under REGULATED.
    pub redaction: Option<RedactionPolicy>,
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("base_dir", &self.base_dir)
            .field("compliance", &self.compliance)
            .field("lock_ttl", &self.lock_ttl)
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("intentusnet_data"),
            compliance: ComplianceMode::Development,
            lock_ttl: DEFAULT_LOCK_TTL,
            signer: None,
            redaction: None,
        }
    }
}

impl RuntimeConfig {
    /// Configuration rooted at `base_dir` with defaults otherwise.
    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), ..Default::default() }
    }

    /// Directory of execution WAL files.
    pub fn wal_dir(&self) -> PathBuf {
        self.base_dir.join("wal")
    }

    /// Directory of execution record files.
    pub fn records_dir(&self) -> PathBuf {
        self.base_dir.join("records")
    }

    /// Directory of execution lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Directory of the idempotency index.
    pub fn idempotency_dir(&self) -> PathBuf {
        self.base_dir.join("idempotency")
    }

    /// Path of the idempotency index file.
    pub fn idempotency_index_path(&self) -> PathBuf {
        self.idempotency_dir().join("idempotency_index.json")
    }

    /// Create the full on-disk layout.
    pub async fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.wal_dir(),
            self.records_dir(),
            self.locks_dir(),
            self.idempotency_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Whether `path` lies inside this runtime's base directory.
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.base_dir)
    }
}
