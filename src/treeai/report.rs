use anyhow::Result;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::treeai::fsutil::write_atomic;

/// One analyzed file as it appears in the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub file_path: String,
    pub explanation: String,
    pub content: String,
}

pub struct ReportHeader<'a> {
    pub generated_at: DateTime<Local>,
    pub target_dir: &'a Path,
    pub model: &'a str,
}

fn relative_display(target_dir: &Path, file_path: &str) -> String {
    Path::new(file_path)
        .strip_prefix(target_dir)
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|_| file_path.to_string())
}

/// Everything after the header. Identical for identical inputs no matter
/// how many times the run was interrupted.
pub fn render_body(target_dir: &Path, tree: &str, entries: &[ReportEntry]) -> String {
    let mut sorted: Vec<&ReportEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.file_path.cmp(&b.file_path));

    let mut out = String::new();
    out.push_str("## File Tree Structure\n\n```\n");
    out.push_str(tree);
    out.push_str("\n```\n\n## File\n\n");
    for entry in sorted {
        let rel = relative_display(target_dir, &entry.file_path);
        let _ = write!(out, "<{rel}>\n\nExplication:\n{}\n\n", entry.explanation);
        if !entry.content.is_empty() {
            let _ = write!(out, "File Contents:\n```\n{}\n```\n</{rel}>\n\n", entry.content);
        }
        out.push_str("+++\n\n");
    }
    out
}

pub fn render(header: &ReportHeader<'_>, tree: &str, entries: &[ReportEntry]) -> String {
    let mut out = String::new();
    out.push_str("# Folder Context Analysis\n\n");
    let _ = writeln!(
        out,
        "**Analysis Date:** {}",
        header.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "**Target Folder:** {}", header.target_dir.display());
    let _ = writeln!(out, "**AI Model:** {}\n", header.model);
    out.push_str(&render_body(header.target_dir, tree, entries));
    out
}

pub fn write_report(
    output: &Path,
    header: &ReportHeader<'_>,
    tree: &str,
    entries: &[ReportEntry],
) -> Result<PathBuf> {
    write_atomic(output, render(header, tree, entries).as_bytes())?;
    Ok(output.to_path_buf())
}
