use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::treeai::config::load_config;
use crate::treeai::paths::resolve_target_dir;
use crate::treeai::walker;

#[derive(Debug, Clone, Default)]
pub struct TreeArgs {
    pub target: PathBuf,
    pub config: Option<PathBuf>,
}

pub fn run(args: &TreeArgs) -> Result<CommandReport> {
    let cfg = load_config(args.config.as_deref())?;
    let target = resolve_target_dir(&args.target)?;
    let discovery = walker::discover(&target, &cfg)?;

    let mut report = CommandReport::new("tree");
    report.detail(format!("target={}", target.display()));
    report.detail(format!("files={}", discovery.files.len()));
    for line in discovery.tree.lines() {
        report.detail(line);
    }
    Ok(report)
}
