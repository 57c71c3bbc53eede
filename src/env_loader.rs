use std::env;
use std::path::PathBuf;

use crate::error::WarnCode;
use crate::treeai::paths::config_home;
use crate::treeai::warn::{self, WarnEvent};

include!(concat!(env!("OUT_DIR"), "/treeai_env_allowlist.rs"));

const ENV_PREFIX: &str = "TREEAI_";

fn fallback_dotenv_path(treeai_home: Option<PathBuf>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    let base = treeai_home.or(config_dir)?;
    Some(base.join(".env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(env::var_os("TREEAI_HOME").map(PathBuf::from), config_home());

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

fn unknown_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    out.sort();
    out
}

/// `TREEAI_*` variables set in the environment that nothing reads,
/// usually a typo of a real override.
pub fn warn_unknown_env() {
    for key in unknown_keys(env::vars_os().filter_map(|(key, _)| key.into_string().ok())) {
        warn::emit(WarnEvent {
            code: WarnCode::W010UnknownEnv,
            stage: "config",
            action: "load-env",
            path: &key,
            retry: "none",
            reason: "unknown-variable",
            err: "variable is not read by tree-ai",
        });
    }
}
