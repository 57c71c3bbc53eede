use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;

use crate::error::TreeAiError;
use crate::treeai::fsutil::ensure_dir;
use crate::treeai::paths::CheckpointPaths;

/// Contents of `run.lock` while a process owns the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub build_uuid: String,
    pub started_at: DateTime<Utc>,
}

/// Exclusive advisory lock on one checkpoint folder. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(paths: &CheckpointPaths) -> Result<Self> {
        ensure_dir(&paths.checkpoint_dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&paths.lock_file)
            .with_context(|| format!("failed to open {}", paths.lock_file.display()))?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            let holder = read_lock_info(paths)
                .map(|info| format!("pid {}", info.pid))
                .unwrap_or_else(|| "unknown holder".to_string());
            return Err(TreeAiError::CheckpointLocked(format!(
                "{} ({holder})",
                paths.checkpoint_dir.display()
            ))
            .into());
        }

        let info = LockInfo {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            started_at: Utc::now(),
        };
        file.set_len(0)?;
        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Best-effort read of the last holder recorded in the lock file.
pub fn read_lock_info(paths: &CheckpointPaths) -> Option<LockInfo> {
    let raw = fs::read_to_string(&paths.lock_file).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Whether some process currently holds the lock.
pub fn is_held(paths: &CheckpointPaths) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(&paths.lock_file) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}
