use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::treeai::config::load_config;
use crate::treeai::ledger::Ledger;
use crate::treeai::lock::is_held;
use crate::treeai::paths::CheckpointPaths;

#[derive(Debug, Clone, Default)]
pub struct CleanArgs {
    pub target: PathBuf,
    pub config: Option<PathBuf>,
}

pub fn run(args: &CleanArgs) -> Result<CommandReport> {
    let cfg = load_config(args.config.as_deref())?;
    let folder = cfg.output.checkpoint_folder.as_str();
    let paths = CheckpointPaths::resolve(&args.target, folder)?;
    let mut report = CommandReport::new("clean");
    report.detail(format!("checkpoint_dir={}", paths.checkpoint_dir.display()));

    if is_held(&paths) {
        report.issue("checkpoint is locked by a running analyze; not removed");
        return Ok(report);
    }
    if !paths.checkpoint_dir.exists() {
        report.detail("removed=false (nothing to clean)");
        return Ok(report);
    }

    let ledger = Ledger::new(&paths.target_dir, folder);
    let had_run = ledger.inspect()?.is_present();
    if ledger.cleanup() {
        report.detail("removed=true");
        if had_run {
            report.detail("run.discarded=true");
        }
    } else {
        report.issue("checkpoint could not be removed; see TREEAI_WARN output");
    }
    Ok(report)
}
