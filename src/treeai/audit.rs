use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;

use crate::error::WarnCode;
use crate::treeai::paths::CheckpointPaths;
use crate::treeai::warn::{self, WarnEvent};

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &CheckpointPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.checkpoint_dir)
        .with_context(|| format!("failed to create {}", paths.checkpoint_dir.display()))?;
    let event = AuditEvent {
        at: Utc::now(),
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.audit_file)
        .with_context(|| format!("failed to open {}", paths.audit_file.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit writes never stop a run.
pub fn record(paths: &CheckpointPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        warn::emit(WarnEvent {
            code: WarnCode::W011AuditFailed,
            stage: "audit",
            action: phase,
            path: &paths.audit_file.display().to_string(),
            retry: "none",
            reason: "audit-append-failed",
            err: &format!("{err:#}"),
        });
    }
}
