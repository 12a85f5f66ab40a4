//! Crash-safe file plumbing shared by the WAL, the recorder and the
//! idempotency index.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{WalError, WalResult};

/// Atomically write `bytes` to `path`.
///
/// Write to a temp file in the same directory, fsync it, rename over the
/// target, then fsync the parent directory so the rename itself survives a
/// crash.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> WalResult<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| WalError::io(&temp_path, e))?;
    file.write_all(bytes).await.map_err(|e| WalError::io(&temp_path, e))?;
    file.sync_all().await.map_err(|e| WalError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| WalError::io(path, e))?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Fsync a directory so renames and creations inside it are durable.
pub fn fsync_dir(dir: &Path) -> WalResult<()> {
    let handle = std::fs::File::open(dir).map_err(|e| WalError::io(dir, e))?;
    handle.sync_all().map_err(|e| WalError::io(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("index.json");

        atomic_write(&target, b"{\"v\":1}").await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"{\"v\":1}");

        atomic_write(&target, b"{\"v\":2}").await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"{\"v\":2}");

        // No temp file is left behind.
        assert!(!target.with_extension("tmp").exists());
    }
}
