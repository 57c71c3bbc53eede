use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::TreeAiError;
use crate::treeai::loaded::{AbsentReason, Loaded};

/// Write `path` through a temporary sibling file that is renamed into place
/// only after `write` succeeded and the data reached the disk.
///
/// The temporary file is owned by a guard: any early return (a failing
/// `write`, a failed fsync, a failed rename) deletes it, so a reader of
/// `path` sees either the previous version or the complete new one.
pub fn write_atomic_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let persist_err = |source: std::io::Error| TreeAiError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(persist_err)?;
    write(tmp.as_file_mut()).map_err(persist_err)?;
    tmp.as_file_mut().flush().map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|err| persist_err(err.error))?;
    Ok(())
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic_with(path, |file| file.write_all(bytes))
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    write_atomic(path, format!("{data}\n").as_bytes())
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

/// Read a JSON document carrying a top-level `schema_version`.
///
/// The version is probed on the untyped value first so a document written by
/// a different schema reports as a mismatch rather than as a missing field.
pub fn read_versioned_json<T: DeserializeOwned>(path: &Path, expected: u32) -> Loaded<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Loaded::Absent(AbsentReason::Missing);
        }
        Err(err) => return Loaded::Absent(AbsentReason::Unreadable(err.to_string())),
    };
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => return Loaded::Absent(AbsentReason::Corrupt(err.to_string())),
    };
    let found = value.get("schema_version").and_then(Value::as_u64);
    if found != Some(u64::from(expected)) {
        return Loaded::Absent(AbsentReason::SchemaMismatch { found, expected });
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Loaded::Present(parsed),
        Err(err) => Loaded::Absent(AbsentReason::Corrupt(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("doc.json");
        write_atomic(&path, b"{\"v\":1}\n").expect("first write");
        write_atomic(&path, b"{\"v\":2}\n").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\"v\":2}\n");
        assert!(leftover_temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn failure_mid_write_keeps_previous_version_and_removes_temp() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("doc.json");
        write_atomic(&path, b"{\"v\":1}\n").expect("seed");

        let err = write_atomic_with(&path, |file| {
            file.write_all(b"{\"v\":")?;
            Err(std::io::Error::other("simulated disk full"))
        })
        .expect_err("injected failure");
        assert!(format!("{err:#}").contains("simulated disk full"));

        let raw = fs::read_to_string(&path).expect("read");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("still valid json");
        assert_eq!(parsed["v"], 1);
        assert!(leftover_temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn failure_mid_write_on_fresh_path_leaves_nothing_visible() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("fresh.json");
        let _ = write_atomic_with(&path, |file| {
            file.write_all(b"{")?;
            Err(std::io::Error::other("boom"))
        });
        assert!(!path.exists());
        assert!(leftover_temp_files(tmp.path()).is_empty());
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Doc {
        schema_version: u32,
        name: String,
    }

    #[test]
    fn read_versioned_json_classifies_outcomes() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("doc.json");

        assert_eq!(
            read_versioned_json::<Doc>(&path, 1),
            Loaded::Absent(AbsentReason::Missing)
        );

        fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            read_versioned_json::<Doc>(&path, 1),
            Loaded::Absent(AbsentReason::Corrupt(_))
        ));

        fs::write(&path, r#"{"schema_version": 7, "other": true}"#).expect("write");
        assert_eq!(
            read_versioned_json::<Doc>(&path, 1),
            Loaded::Absent(AbsentReason::SchemaMismatch {
                found: Some(7),
                expected: 1
            })
        );

        fs::write(&path, r#"{"schema_version": 1}"#).expect("write");
        assert!(matches!(
            read_versioned_json::<Doc>(&path, 1),
            Loaded::Absent(AbsentReason::Corrupt(_))
        ));

        fs::write(&path, r#"{"schema_version": 1, "name": "ok"}"#).expect("write");
        assert_eq!(
            read_versioned_json::<Doc>(&path, 1),
            Loaded::Present(Doc {
                schema_version: 1,
                name: "ok".to_string()
            })
        );
    }

    #[test]
    fn rename_failure_cleans_up_temp() {
        let tmp = tempdir().expect("tempdir");
        let blocked = tmp.path().join("blocked");
        fs::create_dir_all(blocked.join("inner")).expect("mkdir");
        assert!(write_atomic(&blocked, b"data").is_err());
        assert!(blocked.is_dir());
        assert!(leftover_temp_files(tmp.path()).is_empty());
    }
}
