use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::WarnCode;
use crate::llm::analyzer::Analyzer;
use crate::treeai::audit;
use crate::treeai::config::TreeAiConfig;
use crate::treeai::ledger::Ledger;
use crate::treeai::loaded::Loaded;
use crate::treeai::lock::RunLock;
use crate::treeai::paths::{CheckpointPaths, resolve_target_dir};
use crate::treeai::report::{self, ReportEntry, ReportHeader};
use crate::treeai::walker;
use crate::treeai::warn::{self, WarnEvent};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many newly analyzed files, leaving the run resumable.
    pub limit: Option<usize>,
    pub fresh: bool,
    pub keep_checkpoint: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub target_dir: PathBuf,
    pub discovered: usize,
    pub skipped: usize,
    pub resumed: usize,
    pub analyzed: usize,
    pub degraded: usize,
    pub healed: usize,
    pub adopted: usize,
    pub failed_writes: usize,
    pub pending: Vec<String>,
    pub report_path: Option<PathBuf>,
    pub finished: bool,
    pub checkpoint_removed: bool,
}

fn relative(target: &Path, file_path: &str) -> String {
    Path::new(file_path)
        .strip_prefix(target)
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|_| file_path.to_string())
}

fn delay(secs: f64) {
    if secs <= 0.0 {
        return;
    }
    if let Ok(pause) = Duration::try_from_secs_f64(secs) {
        thread::sleep(pause);
    }
}

pub fn run(
    cfg: &TreeAiConfig,
    target: &Path,
    analyzer: &dyn Analyzer,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let target_dir = resolve_target_dir(target)?;
    let folder = cfg.output.checkpoint_folder.as_str();
    let paths = CheckpointPaths::resolve(&target_dir, folder)?;
    let ledger = Ledger::new(&target_dir, folder);

    let mut outcome = RunOutcome {
        target_dir: target_dir.clone(),
        ..RunOutcome::default()
    };

    let discovery = walker::discover(&target_dir, cfg)?;
    outcome.discovered = discovery.files.len();
    outcome.skipped = discovery.skipped;

    if options.dry_run {
        let completed = if options.fresh {
            Default::default()
        } else {
            ledger.get_completed()?
        };
        outcome.resumed = discovery
            .files
            .iter()
            .filter(|f| completed.contains(f))
            .count();
        outcome.pending = discovery
            .files
            .iter()
            .filter(|f| !completed.contains(f))
            .cloned()
            .collect();
        return Ok(outcome);
    }

    let lock = RunLock::acquire(&paths)?;
    if options.fresh {
        ledger.discard_run()?;
    }

    let model_id = analyzer.model_id().to_string();
    let completed = match ledger.load()? {
        Loaded::Present(_) => {
            let completed = ledger.get_completed()?;
            ledger.reconcile(&completed)?;
            audit::record(
                &paths,
                "resume",
                if completed.is_empty() { "empty" } else { "ok" },
                &format!(
                    "completed={} healed={} adopted={}",
                    completed.len(),
                    completed.healed.len(),
                    completed.adopted.len()
                ),
            );
            completed
        }
        Loaded::Absent(_) => {
            ledger.initialize(discovery.files.len() as u64, &model_id)?;
            Default::default()
        }
    };
    outcome.healed = completed.healed.len();
    outcome.adopted = completed.adopted.len();

    let mut entries: BTreeMap<String, ReportEntry> = BTreeMap::new();
    for file_path in &discovery.files {
        if let Some(result) = completed.results.get(file_path) {
            entries.insert(
                file_path.clone(),
                ReportEntry {
                    file_path: file_path.clone(),
                    explanation: result.explanation_text.clone(),
                    content: result.captured_content.clone(),
                },
            );
        }
    }
    outcome.resumed = entries.len();

    let pending: Vec<&String> = discovery
        .files
        .iter()
        .filter(|f| !completed.contains(f))
        .collect();
    let total = discovery.files.len();
    let delay_secs = cfg.analysis.delay_between_requests_secs;

    for (idx, file_path) in pending.iter().enumerate() {
        if options.limit.is_some_and(|limit| outcome.analyzed >= limit) {
            outcome.pending = pending[idx..].iter().map(|f| (*f).clone()).collect();
            break;
        }
        let rel = relative(&target_dir, file_path);
        eprintln!("[{}/{}] {rel}", outcome.resumed + idx + 1, total);

        let analysis = analyzer.analyze(file_path);
        outcome.analyzed += 1;
        if analysis.degraded {
            outcome.degraded += 1;
        }

        match ledger.record_completion(file_path, &analysis.explanation, &analysis.content) {
            Ok(_) => audit::record(
                &paths,
                "file",
                if analysis.degraded { "degraded" } else { "ok" },
                &rel,
            ),
            Err(err) if !cfg.output.stop_on_write_error => {
                outcome.failed_writes += 1;
                warn::emit(WarnEvent {
                    code: WarnCode::W007PersistFailed,
                    stage: "pipeline",
                    action: "record-completion",
                    path: file_path,
                    retry: "next-run",
                    reason: "write-failed",
                    err: &format!("{err:#}"),
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to record result for {rel}"));
            }
        }

        entries.insert(
            (*file_path).clone(),
            ReportEntry {
                file_path: (*file_path).clone(),
                explanation: analysis.explanation,
                content: analysis.content,
            },
        );

        if idx + 1 < pending.len() {
            delay(delay_secs);
        }
    }

    if !outcome.pending.is_empty() {
        return Ok(outcome);
    }

    let header = ReportHeader {
        generated_at: Local::now(),
        target_dir: &target_dir,
        model: &model_id,
    };
    let entries: Vec<ReportEntry> = entries.into_values().collect();
    let report_path = report::write_report(
        &target_dir.join(&cfg.output.filename),
        &header,
        &discovery.tree,
        &entries,
    )?;
    // Only a written report closes the run; until then a rerun resumes.
    ledger.mark_run_completed()?;
    outcome.report_path = Some(report_path);
    outcome.finished = true;

    drop(lock);
    if cfg.output.cleanup_checkpoint && !options.keep_checkpoint {
        outcome.checkpoint_removed = ledger.cleanup();
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::analyzer::Analysis;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    /// Deterministic analyzer that remembers what it was asked.
    #[derive(Default)]
    struct Counting {
        calls: RefCell<Vec<String>>,
    }

    impl Analyzer for Counting {
        fn analyze(&self, file_path: &str) -> Analysis {
            self.calls.borrow_mut().push(file_path.to_string());
            let content = fs::read_to_string(file_path).unwrap_or_default();
            Analysis {
                explanation: format!("explains {}", file_path.rsplit('/').next().unwrap_or("")),
                content,
                degraded: false,
            }
        }

        fn model_id(&self) -> &str {
            "counting"
        }
    }

    fn quiet_config() -> TreeAiConfig {
        let mut cfg = TreeAiConfig::default();
        cfg.analysis.delay_between_requests_secs = 0.0;
        cfg
    }

    fn seed(root: &Path) {
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(root.join(name), format!("body of {name}\n")).expect("seed");
        }
    }

    fn report_body(path: &Path) -> String {
        let text = fs::read_to_string(path).expect("report");
        let idx = text.find("## File Tree Structure").expect("body marker");
        text[idx..].to_string()
    }

    fn names(calls: &[String]) -> Vec<&str> {
        calls
            .iter()
            .map(|c| c.rsplit('/').next().unwrap_or(""))
            .collect()
    }

    #[test]
    fn interrupted_run_resumes_without_redoing_work() {
        let interrupted = tempdir().expect("tempdir");
        seed(interrupted.path());
        let cfg = quiet_config();

        let first = Counting::default();
        let limited = RunOptions {
            limit: Some(2),
            ..RunOptions::default()
        };
        let out = run(&cfg, interrupted.path(), &first, &limited).expect("first run");
        assert!(!out.finished);
        assert_eq!(out.analyzed, 2);
        assert_eq!(names(&first.calls.borrow()), vec!["a.txt", "b.txt"]);

        let second = Counting::default();
        let out = run(&cfg, interrupted.path(), &second, &RunOptions::default()).expect("resume");
        assert!(out.finished);
        assert_eq!(out.resumed, 2);
        assert_eq!(names(&second.calls.borrow()), vec!["c.txt"]);
        assert!(out.checkpoint_removed);
        assert!(!interrupted.path().join(".tree-ai").exists());

        let straight = tempdir().expect("tempdir");
        seed(straight.path());
        let single = Counting::default();
        run(&cfg, straight.path(), &single, &RunOptions::default()).expect("straight run");

        let body_a = report_body(&interrupted.path().join("file_tree_structure.md"));
        let body_b = report_body(&straight.path().join("file_tree_structure.md"));
        assert_eq!(body_a, body_b);
    }

    #[test]
    fn finished_checkpoint_is_not_resumed() {
        let tmp = tempdir().expect("tempdir");
        seed(tmp.path());
        let cfg = quiet_config();
        let limited = RunOptions {
            limit: Some(3),
            keep_checkpoint: true,
            ..RunOptions::default()
        };
        // All three fit under the limit, so the run finishes.
        let out = run(&cfg, tmp.path(), &Counting::default(), &limited).expect("run");
        assert!(out.finished);
        assert!(!out.checkpoint_removed);

        let again = Counting::default();
        let out = run(&cfg, tmp.path(), &again, &RunOptions::default()).expect("rerun");
        // A completed record is never resumed, so everything is redone.
        assert_eq!(again.calls.borrow().len(), 3);
        assert_eq!(out.resumed, 0);
    }

    #[test]
    fn failed_report_write_leaves_run_resumable() {
        let tmp = tempdir().expect("tempdir");
        seed(tmp.path());
        let mut cfg = quiet_config();
        cfg.output.filename = "report.md".to_string();
        // A directory in the report's place makes the final rename fail.
        fs::create_dir(tmp.path().join("report.md")).expect("block report path");

        let first = Counting::default();
        run(&cfg, tmp.path(), &first, &RunOptions::default()).expect_err("report write fails");
        assert_eq!(first.calls.borrow().len(), 3);

        let ledger = Ledger::new(tmp.path(), ".tree-ai");
        let progress = ledger.progress().expect("progress").expect("record kept");
        assert_eq!(progress.completed_files, 3);

        fs::remove_dir(tmp.path().join("report.md")).expect("unblock");
        let again = Counting::default();
        let out = run(&cfg, tmp.path(), &again, &RunOptions::default()).expect("rerun");
        assert!(again.calls.borrow().is_empty());
        assert_eq!(out.resumed, 3);
        assert_eq!(out.analyzed, 0);
        assert!(out.finished);
        assert!(tmp.path().join("report.md").is_file());
    }

    #[test]
    fn oversized_delay_does_not_panic() {
        delay(1e30);
        delay(f64::NAN);
    }

    #[test]
    fn missing_result_record_is_reanalyzed() {
        let tmp = tempdir().expect("tempdir");
        seed(tmp.path());
        let cfg = quiet_config();
        let limited = RunOptions {
            limit: Some(2),
            ..RunOptions::default()
        };
        run(&cfg, tmp.path(), &Counting::default(), &limited).expect("first run");

        let ledger = Ledger::new(tmp.path(), ".tree-ai");
        let store = ledger.store().expect("store");
        let a = fs::canonicalize(tmp.path().join("a.txt")).expect("canonical");
        let key = store.key_for(a.to_str().expect("utf8"));
        fs::remove_file(store.results_dir().join(key)).expect("remove result");

        let again = Counting::default();
        let out = run(&cfg, tmp.path(), &again, &RunOptions::default()).expect("resume");
        assert_eq!(out.healed, 1);
        assert_eq!(names(&again.calls.borrow()), vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn dry_run_lists_pending_without_writing() {
        let tmp = tempdir().expect("tempdir");
        seed(tmp.path());
        let cfg = quiet_config();
        let analyzer = Counting::default();
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let out = run(&cfg, tmp.path(), &analyzer, &options).expect("dry run");
        assert_eq!(out.pending.len(), 3);
        assert!(analyzer.calls.borrow().is_empty());
        assert!(!tmp.path().join(".tree-ai").exists());
    }

    #[test]
    fn fresh_discards_previous_progress() {
        let tmp = tempdir().expect("tempdir");
        seed(tmp.path());
        let cfg = quiet_config();
        let limited = RunOptions {
            limit: Some(1),
            ..RunOptions::default()
        };
        run(&cfg, tmp.path(), &Counting::default(), &limited).expect("first run");

        let again = Counting::default();
        let fresh = RunOptions {
            fresh: true,
            ..RunOptions::default()
        };
        run(&cfg, tmp.path(), &again, &fresh).expect("fresh run");
        assert_eq!(again.calls.borrow().len(), 3);
    }
}
