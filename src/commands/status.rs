use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::commands::CommandReport;
use crate::treeai::config::{TreeAiConfig, load_config};
use crate::treeai::ledger::{Ledger, RunStatus};
use crate::treeai::loaded::{AbsentReason, Loaded};
use crate::treeai::lock::{is_held, read_lock_info};
use crate::treeai::paths::CheckpointPaths;
use crate::treeai::util::truncate_with_ellipsis;

#[derive(Debug, Clone, Default)]
pub struct StatusArgs {
    pub target: PathBuf,
    pub config: Option<PathBuf>,
    /// Also show the stored result for this file.
    pub file: Option<PathBuf>,
}

const EXPLANATION_PREVIEW_CHARS: usize = 120;

fn absolute_file(target_dir: &Path, file: &Path) -> PathBuf {
    fs::canonicalize(file).unwrap_or_else(|_| target_dir.join(file))
}

/// Stored result for one file, looked up by its storage key.
pub fn describe_file(target: &Path, cfg: &TreeAiConfig, file: &Path) -> Result<CommandReport> {
    let paths = CheckpointPaths::resolve(target, &cfg.output.checkpoint_folder)?;
    let ledger = Ledger::new(&paths.target_dir, cfg.output.checkpoint_folder.as_str());
    let store = ledger.store()?;
    let mut report = CommandReport::new("status");

    let absolute = absolute_file(&paths.target_dir, file);
    let Some(file_path) = absolute.to_str() else {
        report.issue(format!("file path is not valid UTF-8: {}", absolute.display()));
        return Ok(report);
    };
    report.detail(format!("file={file_path}"));
    report.detail(format!("file.key={}", store.key_for(file_path)));
    match store.get(file_path) {
        Loaded::Present(result) => {
            report.detail("file.result=stored");
            report.detail(format!("file.analyzed_at={}", result.analyzed_at.to_rfc3339()));
            report.detail(format!(
                "file.explanation={}",
                truncate_with_ellipsis(
                    &result.explanation_text.replace('\n', " "),
                    EXPLANATION_PREVIEW_CHARS
                )
            ));
        }
        Loaded::Absent(AbsentReason::Missing) => report.detail("file.result=none"),
        Loaded::Absent(reason) => {
            report.detail(format!("file.result=unusable ({}: {reason})", reason.tag()));
        }
    }
    Ok(report)
}

/// Checkpoint state of `target` as report lines. An unusable checkpoint is a
/// detail, not an issue: the next run simply starts over.
pub fn describe(target: &Path, cfg: &TreeAiConfig) -> Result<CommandReport> {
    let paths = CheckpointPaths::resolve(target, &cfg.output.checkpoint_folder)?;
    let ledger = Ledger::new(&paths.target_dir, cfg.output.checkpoint_folder.as_str());
    let mut report = CommandReport::new("status");
    report.detail(format!("checkpoint_dir={}", paths.checkpoint_dir.display()));

    match ledger.inspect()? {
        Loaded::Present(record) => {
            let status = match record.status {
                RunStatus::InProgress => "in_progress",
                RunStatus::Completed => "completed",
            };
            report.detail(format!("run.status={status}"));
            report.detail(format!(
                "run.progress={}/{}",
                record.completed_files, record.total_files_discovered
            ));
            report.detail(format!("run.model={}", record.model_identifier));
            report.detail(format!("run.started_at={}", record.started_at.to_rfc3339()));
            report.detail(format!(
                "run.last_updated_at={}",
                record.last_updated_at.to_rfc3339()
            ));
            if record.status == RunStatus::Completed {
                report.detail("run.resumable=false (finished run; next analyze starts over)");
            }
        }
        Loaded::Absent(AbsentReason::Missing) => report.detail("run=none"),
        Loaded::Absent(reason) => {
            report.detail(format!("run=unusable ({}: {reason})", reason.tag()));
        }
    }

    let store = ledger.store()?;
    report.detail(format!("results_dir={}", store.results_dir().display()));
    report.detail(format!("results.stored={}", store.scan().len()));

    if is_held(&paths) {
        let holder = read_lock_info(&paths)
            .map(|info| format!("pid={} build={}", info.pid, info.build_uuid))
            .unwrap_or_else(|| "holder=unknown".to_string());
        report.detail(format!("lock=held ({holder})"));
    }
    Ok(report)
}

pub fn run(args: &StatusArgs) -> Result<CommandReport> {
    let cfg = load_config(args.config.as_deref())?;
    let mut report = describe(&args.target, &cfg)?;
    if let Some(file) = &args.file {
        report.merge(describe_file(&args.target, &cfg, file)?);
    }
    Ok(report)
}
