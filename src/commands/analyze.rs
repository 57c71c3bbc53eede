use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::commands::{CommandReport, status};
use crate::llm::analyzer::LlmAnalyzer;
use crate::llm::client::{LocalClient, ModelClient, build_client, parse_prefixed_model};
use crate::treeai::config::load_config;
use crate::treeai::ledger::Ledger;
use crate::treeai::pipeline::{self, RunOptions, RunOutcome};
use crate::treeai::prompt::load_prompt;

#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    pub target: PathBuf,
    pub config: Option<PathBuf>,
    pub options: RunOptions,
}

fn relative(target: &Path, file_path: &str) -> String {
    Path::new(file_path)
        .strip_prefix(target)
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|_| file_path.to_string())
}

fn summarize(outcome: &RunOutcome, report: &mut CommandReport) {
    report.detail(format!("target={}", outcome.target_dir.display()));
    report.detail(format!("discovered={}", outcome.discovered));
    report.detail(format!("resumed={}", outcome.resumed));
    report.detail(format!("analyzed={}", outcome.analyzed));
    if outcome.skipped > 0 {
        report.detail(format!("skipped={}", outcome.skipped));
    }
    if outcome.degraded > 0 {
        report.detail(format!("degraded={}", outcome.degraded));
    }
    if outcome.healed > 0 {
        report.detail(format!("healed={}", outcome.healed));
    }
    if outcome.adopted > 0 {
        report.detail(format!("adopted={}", outcome.adopted));
    }
    if outcome.failed_writes > 0 {
        report.detail(format!("failed_writes={}", outcome.failed_writes));
    }
}

pub fn run(args: &AnalyzeArgs) -> Result<CommandReport> {
    let cfg = load_config(args.config.as_deref())?;
    let prompt = load_prompt(cfg.analysis.prompt_file.as_deref())?;
    let mut report = CommandReport::new("analyze");

    // Listing pending work needs no credentials.
    let client: Box<dyn ModelClient> = if args.options.dry_run {
        Box::new(LocalClient::new(parse_prefixed_model(&cfg.llm.model).1))
    } else {
        build_client(&cfg.llm)?
    };
    let analyzer = LlmAnalyzer::new(client, &cfg.llm, prompt);
    let outcome = pipeline::run(&cfg, &args.target, &analyzer, &args.options)?;
    summarize(&outcome, &mut report);

    if args.options.dry_run {
        report.detail(format!("pending={}", outcome.pending.len()));
        for file in &outcome.pending {
            report.detail(format!("pending_file={}", relative(&outcome.target_dir, file)));
        }
        if !args.options.fresh {
            report.merge(status::describe(&outcome.target_dir, &cfg)?);
        }
        return Ok(report);
    }

    if outcome.finished {
        if let Some(path) = &outcome.report_path {
            report.detail(format!("report={}", path.display()));
        }
        report.detail(format!(
            "checkpoint={}",
            if outcome.checkpoint_removed { "removed" } else { "kept" }
        ));
    } else {
        let ledger = Ledger::new(&outcome.target_dir, cfg.output.checkpoint_folder.as_str());
        if let Some(progress) = ledger.progress()? {
            report.detail(format!(
                "progress={}/{} model={}",
                progress.completed_files, progress.total_files, progress.model_identifier
            ));
            report.detail(format!(
                "run.started_at={} run.last_updated_at={}",
                progress.started_at.to_rfc3339(),
                progress.last_updated_at.to_rfc3339()
            ));
        }
        report.detail(format!(
            "pending={} (run analyze again to resume)",
            outcome.pending.len()
        ));
    }
    Ok(report)
}
