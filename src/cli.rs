use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::env_loader;
use crate::treeai::pipeline::RunOptions;

/// Explain every file in a directory tree with an LLM. Interrupted runs
/// resume where they stopped.
#[derive(Debug, Parser)]
#[command(name = "tree-ai")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file (TOML, or the legacy JSON layout)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct TargetArg {
    /// Directory to work on
    #[arg(default_value = ".")]
    target: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze every file and write the report, resuming any interrupted run
    Analyze {
        #[command(flatten)]
        target: TargetArg,
        /// Stop after this many newly analyzed files (the run stays resumable)
        #[arg(long)]
        limit: Option<usize>,
        /// Discard any existing checkpoint before starting
        #[arg(long)]
        fresh: bool,
        /// Keep the checkpoint folder after the report is written
        #[arg(long)]
        keep_checkpoint: bool,
        /// List pending files without analyzing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show checkpoint progress for a directory
    Status {
        #[command(flatten)]
        target: TargetArg,
        /// Show the stored result for one file
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Delete the checkpoint folder of a directory
    Clean {
        #[command(flatten)]
        target: TargetArg,
    },
    /// Print the filtered file tree
    Tree {
        #[command(flatten)]
        target: TargetArg,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    env_loader::warn_unknown_env();

    let config = cli.config.clone();
    let report = match cli.command {
        Command::Analyze {
            target,
            limit,
            fresh,
            keep_checkpoint,
            dry_run,
        } => commands::analyze::run(&commands::analyze::AnalyzeArgs {
            target: target.target,
            config,
            options: RunOptions {
                limit,
                fresh,
                keep_checkpoint,
                dry_run,
            },
        })?,
        Command::Status { target, file } => {
            commands::status::run(&commands::status::StatusArgs {
                target: target.target,
                config,
                file,
            })?
        }
        Command::Clean { target } => commands::clean::run(&commands::clean::CleanArgs {
            target: target.target,
            config,
        })?,
        Command::Tree { target } => commands::tree::run(&commands::tree::TreeArgs {
            target: target.target,
            config,
        })?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
