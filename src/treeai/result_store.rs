use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::treeai::fsutil::{ensure_dir, read_versioned_json, write_json_atomic};
use crate::treeai::loaded::{AbsentReason, Loaded};
use crate::treeai::paths::CheckpointPaths;

pub const RESULT_SCHEMA_VERSION: u32 = 1;
const MAX_SLUG_CHARS: usize = 96;
const SHORT_HASH_HEX: usize = 16;

/// Durable outcome of analyzing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub schema_version: u32,
    pub source_file_path: String,
    pub explanation_text: String,
    pub captured_content: String,
    pub analyzed_at: DateTime<Utc>,
}

/// One JSON document per analyzed file under `<checkpoint>/results`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    target_dir: PathBuf,
    results_dir: PathBuf,
}

fn path_hash(file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sanitize_slug(rel: &str) -> String {
    rel.chars()
        .map(|ch| match ch {
            '/' | '\\' => '_',
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => c,
            _ => '-',
        })
        .take(MAX_SLUG_CHARS)
        .collect()
}

fn is_plain_file_name(reference: &str) -> bool {
    !reference.is_empty()
        && reference != "."
        && reference != ".."
        && !reference.contains(['/', '\\'])
        && reference.ends_with(".json")
}

impl ResultStore {
    pub fn new(paths: &CheckpointPaths) -> Self {
        Self {
            target_dir: paths.target_dir.clone(),
            results_dir: paths.results_dir.clone(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Storage key for `file_path`: a readable slug of the path relative to
    /// the target plus a SHA-256 prefix of the full path string.
    pub fn key_for(&self, file_path: &str) -> String {
        let hash = path_hash(file_path);
        let slug = Path::new(file_path)
            .strip_prefix(&self.target_dir)
            .ok()
            .map(|rel| sanitize_slug(&rel.to_string_lossy()))
            .filter(|slug| !slug.is_empty());
        match slug {
            Some(slug) => format!("{slug}_{}.json", &hash[..SHORT_HASH_HEX]),
            None => format!("{hash}.json"),
        }
    }

    /// Persist the outcome for `file_path`, replacing any previous one.
    /// Returns the reference the ledger stores for it.
    pub fn put(&self, file_path: &str, explanation: &str, captured_content: &str) -> Result<String> {
        ensure_dir(&self.results_dir)?;
        let key = self.key_for(file_path);
        let record = ResultRecord {
            schema_version: RESULT_SCHEMA_VERSION,
            source_file_path: file_path.to_string(),
            explanation_text: explanation.to_string(),
            captured_content: captured_content.to_string(),
            analyzed_at: Utc::now(),
        };
        write_json_atomic(&self.results_dir.join(&key), &record)?;
        Ok(key)
    }

    pub fn get(&self, file_path: &str) -> Loaded<ResultRecord> {
        let key = self.key_for(file_path);
        self.get_reference(&key, file_path)
    }

    pub fn get_reference(&self, reference: &str, file_path: &str) -> Loaded<ResultRecord> {
        if !is_plain_file_name(reference) {
            return Loaded::Absent(AbsentReason::InvalidReference(reference.to_string()));
        }
        let loaded: Loaded<ResultRecord> =
            read_versioned_json(&self.results_dir.join(reference), RESULT_SCHEMA_VERSION);
        match loaded {
            Loaded::Present(record) if record.source_file_path != file_path => {
                Loaded::Absent(AbsentReason::SourceMismatch {
                    recorded: record.source_file_path,
                    expected: file_path.to_string(),
                })
            }
            other => other,
        }
    }

    /// Every valid record whose file name is the key of its own source path,
    /// sorted by reference. Anything else in the directory is ignored.
    pub fn scan(&self) -> Vec<(String, ResultRecord)> {
        let Ok(entries) = fs::read_dir(&self.results_dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_plain_file_name(&name) {
                continue;
            }
            let loaded: Loaded<ResultRecord> =
                read_versioned_json(&entry.path(), RESULT_SCHEMA_VERSION);
            let Loaded::Present(record) = loaded else {
                continue;
            };
            if self.key_for(&record.source_file_path) == name {
                out.push((name, record));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(root: &Path) -> ResultStore {
        ResultStore::new(&CheckpointPaths::under(root, ".tree-ai"))
    }

    fn abs(root: &Path, rel: &str) -> String {
        root.join(rel).to_string_lossy().to_string()
    }

    #[test]
    fn key_combines_readable_slug_and_path_hash() {
        let store = store_at(Path::new("/work/repo"));
        let key = store.key_for("/work/repo/src/main.rs");
        assert!(key.starts_with("src_main.rs_"), "{key}");
        assert!(key.ends_with(".json"));
        assert_eq!(key, store.key_for("/work/repo/src/main.rs"));
        assert_eq!(key.len(), "src_main.rs_".len() + SHORT_HASH_HEX + ".json".len());
    }

    #[test]
    fn colliding_slugs_get_distinct_keys() {
        let store = store_at(Path::new("/work/repo"));
        let nested = store.key_for("/work/repo/a/b.txt");
        let flat = store.key_for("/work/repo/a_b.txt");
        assert!(nested.starts_with("a_b.txt_"));
        assert!(flat.starts_with("a_b.txt_"));
        assert_ne!(nested, flat);
    }

    #[test]
    fn paths_outside_target_use_full_hash() {
        let store = store_at(Path::new("/work/repo"));
        let key = store.key_for("/elsewhere/file.txt");
        assert_eq!(key.len(), 64 + ".json".len());
        assert!(key.chars().take(64).all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn odd_characters_are_sanitized_and_slug_is_capped() {
        let store = store_at(Path::new("/work/repo"));
        let key = store.key_for("/work/repo/dir with space/ü$.md");
        assert!(key.starts_with("dir-with-space_--.md_"), "{key}");

        let long = format!("/work/repo/{}", "x".repeat(300));
        let key = store.key_for(&long);
        assert!(key.len() <= MAX_SLUG_CHARS + 1 + SHORT_HASH_HEX + ".json".len());
    }

    #[test]
    fn put_then_get_returns_record_and_overwrites_cleanly() {
        let tmp = tempdir().expect("tempdir");
        let store = store_at(tmp.path());
        let file = abs(tmp.path(), "a.txt");

        let first = store.put(&file, "first", "alpha").expect("put");
        let second = store.put(&file, "second", "beta").expect("put again");
        assert_eq!(first, second);

        let record = store.get(&file).present().expect("present");
        assert_eq!(record.source_file_path, file);
        assert_eq!(record.explanation_text, "second");
        assert_eq!(record.captured_content, "beta");

        let files: Vec<_> = fs::read_dir(store.results_dir())
            .expect("read dir")
            .flatten()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn get_is_absent_for_missing_and_corrupt_records() {
        let tmp = tempdir().expect("tempdir");
        let store = store_at(tmp.path());
        let file = abs(tmp.path(), "a.txt");
        assert_eq!(store.get(&file), Loaded::Absent(AbsentReason::Missing));

        store.put(&file, "x", "y").expect("put");
        fs::write(store.results_dir().join(store.key_for(&file)), "{\"trunc").expect("corrupt");
        assert!(matches!(
            store.get(&file),
            Loaded::Absent(AbsentReason::Corrupt(_))
        ));
    }

    #[test]
    fn get_reference_rejects_foreign_records_and_traversal() {
        let tmp = tempdir().expect("tempdir");
        let store = store_at(tmp.path());
        let a = abs(tmp.path(), "a.txt");
        let b = abs(tmp.path(), "b.txt");
        let a_ref = store.put(&a, "about a", "a").expect("put");

        assert!(matches!(
            store.get_reference(&a_ref, &b),
            Loaded::Absent(AbsentReason::SourceMismatch { .. })
        ));
        assert!(matches!(
            store.get_reference("../checkpoint.json", &a),
            Loaded::Absent(AbsentReason::InvalidReference(_))
        ));
        assert!(store.get_reference(&a_ref, &a).is_present());
    }

    #[test]
    fn scan_only_returns_records_stored_under_their_own_key() {
        let tmp = tempdir().expect("tempdir");
        let store = store_at(tmp.path());
        let a = abs(tmp.path(), "a.txt");
        let b = abs(tmp.path(), "b.txt");
        store.put(&a, "about a", "a").expect("put a");
        let b_ref = store.put(&b, "about b", "b").expect("put b");
        fs::rename(
            store.results_dir().join(&b_ref),
            store.results_dir().join("renamed.json"),
        )
        .expect("rename");
        fs::write(store.results_dir().join("junk.json"), "[]").expect("junk");
        fs::write(store.results_dir().join(".x.tmp"), "partial").expect("tmp");

        let scanned = store.scan();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].1.source_file_path, a);
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let tmp = tempdir().expect("tempdir");
        assert!(store_at(tmp.path()).scan().is_empty());
    }
}
