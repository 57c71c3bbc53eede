use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::WarnCode;
use crate::treeai::config::TreeAiConfig;
use crate::treeai::warn::{self, WarnEvent};

const TREE_INDENT: &str = "|   ";

/// What one walk of the target found.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Absolute paths of analyzable files, sorted as strings.
    pub files: Vec<String>,
    pub tree: String,
    pub skipped: usize,
}

struct Filter<'a> {
    root: PathBuf,
    cfg: &'a TreeAiConfig,
    gitignore: Option<Gitignore>,
}

impl Filter<'_> {
    fn is_hidden(&self, name: &str) -> bool {
        self.cfg.analysis.exclude_hidden && name.starts_with('.')
    }

    fn ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.gitignore
            .as_ref()
            .is_some_and(|gi| gi.matched(path, is_dir).is_ignore())
    }

    fn keep_dir(&self, path: &Path, name: &str) -> bool {
        if self.is_hidden(name) || self.cfg.analysis.exclude_dirs.iter().any(|d| d == name) {
            return false;
        }
        if path.parent() == Some(self.root.as_path()) && name == self.cfg.output.checkpoint_folder {
            return false;
        }
        !self.ignored(path, true)
    }

    fn keep_file(&self, path: &Path, name: &str) -> bool {
        if self.is_hidden(name) || self.cfg.analysis.exclude_files.iter().any(|f| f == name) {
            return false;
        }
        if path.parent() == Some(self.root.as_path()) && name == self.cfg.output.filename {
            return false;
        }
        !self.ignored(path, false)
    }
}

fn load_gitignore(root: &Path, cfg: &TreeAiConfig) -> Result<Option<Gitignore>> {
    if !cfg.analysis.use_gitignore {
        return Ok(None);
    }
    let gitignore_path = root.join(".gitignore");
    if !gitignore_path.is_file() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&gitignore_path) {
        warn::emit(WarnEvent {
            code: WarnCode::W009SkippedPath,
            stage: "walk",
            action: "load-gitignore",
            path: &gitignore_path.display().to_string(),
            retry: "none",
            reason: "gitignore-partially-invalid",
            err: &err.to_string(),
        });
    }
    let gitignore = builder
        .build()
        .with_context(|| format!("failed to compile {}", gitignore_path.display()))?;
    Ok(Some(gitignore))
}

fn skip(path: &Path, reason: &str, err: &str, discovery: &mut Discovery) {
    discovery.skipped += 1;
    warn::emit(WarnEvent {
        code: WarnCode::W009SkippedPath,
        stage: "walk",
        action: "enumerate",
        path: &path.display().to_string(),
        retry: "none",
        reason,
        err,
    });
}

fn walk_dir(
    filter: &Filter<'_>,
    dir: &Path,
    depth: usize,
    tree: &mut Vec<String>,
    discovery: &mut Discovery,
) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        // The root must be readable; anything below is skipped.
        Err(err) if depth > 0 => {
            skip(dir, "unreadable-directory", &err.to_string(), discovery);
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", dir.display()));
        }
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                skip(dir, "unreadable-entry", &err.to_string(), discovery);
                continue;
            }
        };
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            skip(&path, "non-utf8-name", "path is not valid UTF-8", discovery);
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            skip(&path, "unreadable-entry", "file type unavailable", discovery);
            continue;
        };
        if file_type.is_dir() {
            if filter.keep_dir(&path, &name) {
                dirs.push((name, path));
            }
        } else if file_type.is_file()
            || (file_type.is_symlink() && fs::metadata(&path).is_ok_and(|m| m.is_file()))
        {
            if filter.keep_file(&path, &name) {
                files.push((name, path));
            }
        }
    }
    files.sort();
    dirs.sort();

    for (name, path) in files {
        tree.push(format!("{}|-- {name}", TREE_INDENT.repeat(depth + 1)));
        match path.to_str() {
            Some(p) => discovery.files.push(p.to_string()),
            None => skip(&path, "non-utf8-name", "path is not valid UTF-8", discovery),
        }
    }
    for (name, path) in dirs {
        tree.push(format!("{}|-- {name}/", TREE_INDENT.repeat(depth + 1)));
        walk_dir(filter, &path, depth + 1, tree, discovery)?;
    }
    Ok(())
}

/// Recursive, sorted enumeration of `root` (already canonical) with the
/// configured exclusions applied, plus the tree listing used in the report.
pub fn discover(root: &Path, cfg: &TreeAiConfig) -> Result<Discovery> {
    let filter = Filter {
        root: root.to_path_buf(),
        cfg,
        gitignore: load_gitignore(root, cfg)?,
    };
    let mut discovery = Discovery::default();
    let mut tree = Vec::new();
    walk_dir(&filter, root, 0, &mut tree, &mut discovery)?;
    discovery.files.sort();
    discovery.tree = tree.join("\n");
    Ok(discovery)
}
