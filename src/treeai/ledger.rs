use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{TreeAiError, WarnCode};
use crate::treeai::audit;
use crate::treeai::fsutil::{ensure_dir, read_versioned_json, write_json_atomic};
use crate::treeai::loaded::{AbsentReason, Loaded};
use crate::treeai::paths::CheckpointPaths;
use crate::treeai::result_store::{ResultRecord, ResultStore};
use crate::treeai::util::now_not_before;
use crate::treeai::warn::{self, WarnEvent};

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

/// Only successful analyses are ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub status: EntryStatus,
    pub completed_at: DateTime<Utc>,
    pub result_reference: String,
}

/// The singleton checkpoint document of one run over one target directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub target_directory: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub total_files_discovered: u64,
    pub completed_files: u64,
    pub model_identifier: String,
    pub status: RunStatus,
    pub file_entries: BTreeMap<String, FileEntry>,
}

impl RunRecord {
    fn next_timestamp(&self) -> DateTime<Utc> {
        now_not_before(Some(self.last_updated_at.max(self.started_at)))
    }

    fn recount(&mut self) {
        self.completed_files = self.file_entries.len() as u64;
    }
}

/// Files the ledger can vouch for, each backed by a readable result record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedFiles {
    pub paths: BTreeSet<String>,
    pub results: BTreeMap<String, ResultRecord>,
    /// Ledger entries dropped because their result record was unusable.
    pub healed: Vec<String>,
    /// `(file_path, reference)` of stored results the ledger never recorded.
    pub adopted: Vec<(String, String)>,
}

impl CompletedFiles {
    pub fn contains(&self, file_path: &str) -> bool {
        self.paths.contains(file_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub completed_files: u64,
    pub total_files: u64,
    pub model_identifier: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Owner of the run record for one `(target_dir, checkpoint_folder)` pair.
///
/// The target is re-resolved on every call so a record is always compared
/// against the canonical directory as it is now.
#[derive(Debug, Clone)]
pub struct Ledger {
    target_dir: PathBuf,
    folder_name: String,
}

fn warn_code_for(reason: &AbsentReason) -> WarnCode {
    match reason {
        AbsentReason::AlreadyCompleted => WarnCode::W001LedgerFinished,
        AbsentReason::SchemaMismatch { .. } => WarnCode::W003SchemaMismatch,
        AbsentReason::DirectoryMismatch { .. } => WarnCode::W004DirectoryMismatch,
        _ => WarnCode::W002LedgerCorrupt,
    }
}

fn result_warn_code(reason: &AbsentReason) -> WarnCode {
    match reason {
        AbsentReason::Missing => WarnCode::W005ResultMissing,
        _ => WarnCode::W006ResultCorrupt,
    }
}

/// Checks schema and directory, not status.
fn read_record(paths: &CheckpointPaths) -> Loaded<RunRecord> {
    let loaded: Loaded<RunRecord> =
        read_versioned_json(&paths.checkpoint_file, CHECKPOINT_SCHEMA_VERSION);
    match loaded {
        Loaded::Present(record) => {
            let expected = paths.target_dir.to_string_lossy();
            if record.target_directory != expected {
                return Loaded::Absent(AbsentReason::DirectoryMismatch {
                    recorded: record.target_directory,
                    expected: expected.to_string(),
                });
            }
            Loaded::Present(record)
        }
        absent => absent,
    }
}

/// A record the current run may continue; every rejection except plain
/// absence is reported.
fn load_resumable(paths: &CheckpointPaths, action: &str) -> Loaded<RunRecord> {
    let loaded = match read_record(paths) {
        Loaded::Present(record) if record.status == RunStatus::Completed => {
            Loaded::Absent(AbsentReason::AlreadyCompleted)
        }
        other => other,
    };
    if let Loaded::Absent(reason) = &loaded
        && *reason != AbsentReason::Missing
    {
        warn::emit(WarnEvent {
            code: warn_code_for(reason),
            stage: "ledger",
            action,
            path: &paths.checkpoint_file.display().to_string(),
            retry: "start-fresh",
            reason: reason.tag(),
            err: &reason.to_string(),
        });
    }
    loaded
}

fn save(paths: &CheckpointPaths, record: &RunRecord) -> Result<()> {
    write_json_atomic(&paths.checkpoint_file, record)
}

impl Ledger {
    pub fn new(target_dir: impl Into<PathBuf>, folder_name: impl Into<String>) -> Self {
        Self {
            target_dir: target_dir.into(),
            folder_name: folder_name.into(),
        }
    }

    pub fn paths(&self) -> Result<CheckpointPaths> {
        CheckpointPaths::resolve(&self.target_dir, &self.folder_name)
    }

    pub fn store(&self) -> Result<ResultStore> {
        Ok(ResultStore::new(&self.paths()?))
    }

    /// Start a logically new run. Refuses while a resumable record exists;
    /// callers check `load` first.
    pub fn initialize(&self, total_files: u64, model_id: &str) -> Result<RunRecord> {
        let paths = self.paths()?;
        if let Loaded::Present(record) = read_record(&paths)
            && record.status == RunStatus::InProgress
        {
            return Err(TreeAiError::RunInProgress(paths.target_dir.display().to_string()).into());
        }
        ensure_dir(&paths.checkpoint_dir)?;
        ensure_dir(&paths.results_dir)?;

        let now = Utc::now();
        let record = RunRecord {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            target_directory: paths.target_dir.to_string_lossy().to_string(),
            started_at: now,
            last_updated_at: now,
            total_files_discovered: total_files,
            completed_files: 0,
            model_identifier: model_id.to_string(),
            status: RunStatus::InProgress,
            file_entries: BTreeMap::new(),
        };
        save(&paths, &record)?;
        audit::record(
            &paths,
            "initialize",
            "ok",
            &format!("total_files={total_files} model={model_id}"),
        );
        Ok(record)
    }

    pub fn load(&self) -> Result<Loaded<RunRecord>> {
        let paths = self.paths()?;
        Ok(load_resumable(&paths, "load"))
    }

    /// The stored record regardless of status, without warnings.
    pub fn inspect(&self) -> Result<Loaded<RunRecord>> {
        let paths = self.paths()?;
        Ok(read_record(&paths))
    }

    /// Store the result, then point the run record at it.
    ///
    /// The two writes are independent: a crash in between leaves a result
    /// the next `get_completed` adopts, a failed ledger write leaves a result
    /// that is simply rewritten when the file is analyzed again.
    pub fn record_completion(
        &self,
        file_path: &str,
        explanation: &str,
        captured_content: &str,
    ) -> Result<String> {
        let paths = self.paths()?;
        let store = ResultStore::new(&paths);
        let reference = store.put(file_path, explanation, captured_content)?;

        let Loaded::Present(mut record) = load_resumable(&paths, "record-completion") else {
            return Ok(reference);
        };
        let now = record.next_timestamp();
        record.file_entries.insert(
            file_path.to_string(),
            FileEntry {
                status: EntryStatus::Completed,
                completed_at: now,
                result_reference: reference.clone(),
            },
        );
        record.recount();
        record.last_updated_at = now;
        save(&paths, &record)?;
        Ok(reference)
    }

    pub fn get_completed(&self) -> Result<CompletedFiles> {
        let paths = self.paths()?;
        let Loaded::Present(record) = load_resumable(&paths, "get-completed") else {
            return Ok(CompletedFiles::default());
        };
        let store = ResultStore::new(&paths);
        let mut out = CompletedFiles::default();

        for (file_path, entry) in &record.file_entries {
            match store.get_reference(&entry.result_reference, file_path) {
                Loaded::Present(result) => {
                    out.paths.insert(file_path.clone());
                    out.results.insert(file_path.clone(), result);
                }
                Loaded::Absent(reason) => {
                    warn::emit(WarnEvent {
                        code: result_warn_code(&reason),
                        stage: "ledger",
                        action: "get-completed",
                        path: file_path,
                        retry: "reanalyze",
                        reason: reason.tag(),
                        err: &reason.to_string(),
                    });
                    out.healed.push(file_path.clone());
                }
            }
        }

        for (reference, result) in store.scan() {
            if out.paths.contains(&result.source_file_path) || result.analyzed_at < record.started_at
            {
                continue;
            }
            let file_path = result.source_file_path.clone();
            out.healed.retain(|healed| *healed != file_path);
            out.paths.insert(file_path.clone());
            out.results.insert(file_path.clone(), result);
            out.adopted.push((file_path, reference));
        }

        Ok(out)
    }

    /// Make the record's entries match `completed` exactly. Returns whether
    /// anything had to be written.
    pub fn reconcile(&self, completed: &CompletedFiles) -> Result<bool> {
        let paths = self.paths()?;
        let Loaded::Present(mut record) = load_resumable(&paths, "reconcile") else {
            return Ok(false);
        };

        let adopted: BTreeMap<&str, &str> = completed
            .adopted
            .iter()
            .map(|(path, reference)| (path.as_str(), reference.as_str()))
            .collect();
        let mut entries = BTreeMap::new();
        for file_path in &completed.paths {
            if let Some(reference) = adopted.get(file_path.as_str()) {
                let completed_at = completed
                    .results
                    .get(file_path)
                    .map(|result| result.analyzed_at)
                    .unwrap_or(record.last_updated_at);
                entries.insert(
                    file_path.clone(),
                    FileEntry {
                        status: EntryStatus::Completed,
                        completed_at,
                        result_reference: (*reference).to_string(),
                    },
                );
            } else if let Some(entry) = record.file_entries.get(file_path) {
                entries.insert(file_path.clone(), entry.clone());
            }
        }

        if entries == record.file_entries {
            return Ok(false);
        }
        record.file_entries = entries;
        record.recount();
        record.last_updated_at = record.next_timestamp();
        save(&paths, &record)?;
        audit::record(
            &paths,
            "reconcile",
            "ok",
            &format!(
                "healed={} adopted={} completed_files={}",
                completed.healed.len(),
                completed.adopted.len(),
                record.completed_files
            ),
        );
        Ok(true)
    }

    pub fn mark_run_completed(&self) -> Result<bool> {
        let paths = self.paths()?;
        let Loaded::Present(mut record) = load_resumable(&paths, "mark-completed") else {
            return Ok(false);
        };
        record.status = RunStatus::Completed;
        record.last_updated_at = record.next_timestamp();
        save(&paths, &record)?;
        audit::record(
            &paths,
            "complete",
            "ok",
            &format!("completed_files={}", record.completed_files),
        );
        Ok(true)
    }

    /// Drop the run record and every stored result but keep the folder, so a
    /// lock held inside it stays valid.
    pub fn discard_run(&self) -> Result<()> {
        let paths = self.paths()?;
        match fs::remove_file(&paths.checkpoint_file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(TreeAiError::Persist {
                    path: paths.checkpoint_file,
                    source: err,
                }
                .into());
            }
        }
        match fs::remove_dir_all(&paths.results_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TreeAiError::Persist {
                path: paths.results_dir,
                source: err,
            }
            .into()),
        }
    }

    /// Delete the whole checkpoint folder. Leftovers are harmless, so a
    /// failure is only reported.
    pub fn cleanup(&self) -> bool {
        let paths = match self.paths() {
            Ok(paths) => paths,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: WarnCode::W008CleanupFailed,
                    stage: "ledger",
                    action: "cleanup",
                    path: &self.target_dir.display().to_string(),
                    retry: "manual",
                    reason: "target-unresolvable",
                    err: &format!("{err:#}"),
                });
                return false;
            }
        };
        match fs::remove_dir_all(&paths.checkpoint_dir) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: WarnCode::W008CleanupFailed,
                    stage: "ledger",
                    action: "cleanup",
                    path: &paths.checkpoint_dir.display().to_string(),
                    retry: "manual",
                    reason: "remove-dir-failed",
                    err: &err.to_string(),
                });
                false
            }
        }
    }

    pub fn progress(&self) -> Result<Option<Progress>> {
        let paths = self.paths()?;
        Ok(read_record(&paths)
            .present()
            .filter(|record| record.status == RunStatus::InProgress)
            .map(|record| Progress {
                completed_files: record.completed_files,
                total_files: record.total_files_discovered,
                model_identifier: record.model_identifier,
                started_at: record.started_at,
                last_updated_at: record.last_updated_at,
            }))
    }
}
