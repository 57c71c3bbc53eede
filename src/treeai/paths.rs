use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::TreeAiError;

pub const DEFAULT_CHECKPOINT_FOLDER: &str = ".tree-ai";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const RESULTS_DIR: &str = "results";
const AUDIT_FILE: &str = "audit.jsonl";
const LOCK_FILE: &str = "run.lock";

/// Filesystem layout of one `(target_dir, checkpoint_folder)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub target_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    pub results_dir: PathBuf,
    pub audit_file: PathBuf,
    pub lock_file: PathBuf,
}

impl CheckpointPaths {
    /// Layout under an already canonical target directory.
    pub fn under(target_dir: &Path, folder_name: &str) -> Self {
        let checkpoint_dir = target_dir.join(folder_name);
        Self {
            target_dir: target_dir.to_path_buf(),
            checkpoint_file: checkpoint_dir.join(CHECKPOINT_FILE),
            results_dir: checkpoint_dir.join(RESULTS_DIR),
            audit_file: checkpoint_dir.join(AUDIT_FILE),
            lock_file: checkpoint_dir.join(LOCK_FILE),
            checkpoint_dir,
        }
    }

    pub fn resolve(target_dir: &Path, folder_name: &str) -> Result<Self> {
        validate_folder_name(folder_name)?;
        let target = resolve_target_dir(target_dir)?;
        Ok(Self::under(&target, folder_name))
    }
}

/// Absolute, symlink-free form of the directory a run applies to.
pub fn resolve_target_dir(target_dir: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(target_dir)
        .with_context(|| format!("failed to resolve {}", target_dir.display()))?;
    if !canonical.is_dir() {
        return Err(TreeAiError::InvalidTarget(canonical.display().to_string()).into());
    }
    Ok(canonical)
}

/// A checkpoint folder must be exactly one plain path component, otherwise
/// `cleanup` could reach outside the checkpoint (or delete the target).
pub fn validate_folder_name(folder_name: &str) -> Result<()> {
    let mut components = Path::new(folder_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(anyhow!(
            "invalid checkpoint folder `{folder_name}`: must be a single path component"
        )),
    }
}

pub fn config_home() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tree-ai"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_nests_under_checkpoint_folder() {
        let paths = CheckpointPaths::under(Path::new("/work/repo"), ".tree-ai");
        assert_eq!(paths.checkpoint_dir, PathBuf::from("/work/repo/.tree-ai"));
        assert_eq!(
            paths.checkpoint_file,
            PathBuf::from("/work/repo/.tree-ai/checkpoint.json")
        );
        assert_eq!(paths.results_dir, PathBuf::from("/work/repo/.tree-ai/results"));
        assert_eq!(paths.lock_file, PathBuf::from("/work/repo/.tree-ai/run.lock"));
    }

    #[test]
    fn resolve_canonicalizes_relative_segments() {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("a/b")).expect("mkdir");
        let messy = tmp.path().join("a/b/..");
        let resolved = resolve_target_dir(&messy).expect("resolve");
        let expected = fs::canonicalize(tmp.path().join("a")).expect("canonical");
        assert_eq!(resolved, expected);
    }

    #[test]
    fn folder_name_must_be_single_component() {
        assert!(validate_folder_name(".tree-ai").is_ok());
        assert!(validate_folder_name("checkpoints").is_ok());
        for bad in ["", ".", "..", "a/b", "/abs", "../up"] {
            assert!(validate_folder_name(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn resolve_rejects_files_and_missing_dirs() {
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("file.txt");
        fs::write(&file, "x").expect("write");
        assert!(resolve_target_dir(&file).is_err());
        assert!(resolve_target_dir(&tmp.path().join("missing")).is_err());
    }
}
