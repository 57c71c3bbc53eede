use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeAiError {
    #[error("target is not a directory: {0}")]
    InvalidTarget(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("a checkpoint run is already in progress for {0}")]
    RunInProgress(String),
    #[error("checkpoint is locked by another tree-ai process: {0}")]
    CheckpointLocked(String),
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing api key for provider {provider}: set {env_var}")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },
}

/// Stable codes carried by `TREEAI_WARN` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnCode {
    W001LedgerFinished,
    W002LedgerCorrupt,
    W003SchemaMismatch,
    W004DirectoryMismatch,
    W005ResultMissing,
    W006ResultCorrupt,
    W007PersistFailed,
    W008CleanupFailed,
    W009SkippedPath,
    W010UnknownEnv,
    W011AuditFailed,
    W012AnalyzerFailed,
}

impl WarnCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::W001LedgerFinished => "W001_LEDGER_FINISHED",
            Self::W002LedgerCorrupt => "W002_LEDGER_CORRUPT",
            Self::W003SchemaMismatch => "W003_SCHEMA_MISMATCH",
            Self::W004DirectoryMismatch => "W004_DIRECTORY_MISMATCH",
            Self::W005ResultMissing => "W005_RESULT_MISSING",
            Self::W006ResultCorrupt => "W006_RESULT_CORRUPT",
            Self::W007PersistFailed => "W007_PERSIST_FAILED",
            Self::W008CleanupFailed => "W008_CLEANUP_FAILED",
            Self::W009SkippedPath => "W009_SKIPPED_PATH",
            Self::W010UnknownEnv => "W010_UNKNOWN_ENV",
            Self::W011AuditFailed => "W011_AUDIT_FAILED",
            Self::W012AnalyzerFailed => "W012_ANALYZER_FAILED",
        }
    }
}
