use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::TreeAiError;
use crate::treeai::paths::{DEFAULT_CHECKPOINT_FOLDER, config_home, validate_folder_name};

pub const PROVIDERS: [&str; 5] = ["openai", "anthropic", "gemini", "openai-compatible", "local"];
const LOCAL_CONFIG_FILE: &str = "tree-ai.toml";
const LEGACY_CONFIG_FILE: &str = "config.json";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a senior software engineer documenting a codebase. \
You explain what a single file does, how it fits into its project and what a reader should know \
before changing it. Always answer with a JSON object of the form {\"explication\": \"...\"}.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f64,
    pub max_content_length: usize,
    pub response_format: String,
    pub request_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: 0.2,
            max_content_length: 20_000,
            response_format: "json_object".to_string(),
            request_timeout_secs: 60,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub prompt_file: Option<String>,
    pub use_gitignore: bool,
    pub exclude_hidden: bool,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
    pub delay_between_requests_secs: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            prompt_file: None,
            use_gitignore: true,
            exclude_hidden: true,
            exclude_dirs: [
                "node_modules",
                "target",
                "__pycache__",
                "venv",
                ".git",
                "dist",
                "build",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_files: [
                "package-lock.json",
                "yarn.lock",
                "Cargo.lock",
                "poetry.lock",
                ".DS_Store",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            delay_between_requests_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub filename: String,
    pub checkpoint_folder: String,
    pub cleanup_checkpoint: bool,
    pub stop_on_write_error: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            filename: "file_tree_structure.md".to_string(),
            checkpoint_folder: DEFAULT_CHECKPOINT_FOLDER.to_string(),
            cleanup_checkpoint: true,
            stop_on_write_error: true,
        }
    }
}

/// Built once per process and handed to every component that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TreeAiConfig {
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTreeAiConfig {
    llm: Option<LlmConfig>,
    analysis: Option<AnalysisConfig>,
    output: Option<OutputConfig>,
}

/// Layout of the JSON config the tool historically shipped with.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct LegacyJsonConfig {
    openai: Option<LegacyOpenAi>,
    analysis: Option<LegacyAnalysis>,
    output: Option<LegacyOutput>,
    system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct LegacyOpenAi {
    model: Option<String>,
    temperature: Option<f64>,
    max_content_length: Option<usize>,
    response_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct LegacyAnalysis {
    prompt_file: Option<String>,
    use_gitignore: Option<bool>,
    exclude_hidden: Option<bool>,
    exclude_dirs: Option<Vec<String>>,
    exclude_files: Option<Vec<String>>,
    delay_between_requests: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct LegacyOutput {
    filename: Option<String>,
    checkpoint_folder: Option<String>,
    cleanup_checkpoint: Option<bool>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_optional_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        Err(_) => fallback.to_vec(),
    }
}

const MAX_DELAY_SECS: f64 = 86_400.0;

/// The report is written at the target root, so its name must be a single
/// plain file name.
fn validate_report_name(filename: &str) -> Result<()> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !filename.trim().is_empty() => Ok(()),
        _ => Err(anyhow!(
            "invalid output filename `{filename}`: must be a plain file name"
        )),
    }
}

pub fn validate(cfg: &TreeAiConfig) -> Result<()> {
    if !PROVIDERS.contains(&cfg.llm.provider.as_str()) {
        return Err(anyhow!(
            "invalid llm provider `{}`: use one of {}",
            cfg.llm.provider,
            PROVIDERS.join(", ")
        ));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(anyhow!("invalid llm model: cannot be empty"));
    }
    if !(0.0..=2.0).contains(&cfg.llm.temperature) {
        return Err(anyhow!("invalid temperature: require 0 <= temperature <= 2"));
    }
    if cfg.llm.max_content_length == 0 {
        return Err(anyhow!("invalid max content length: must be >= 1"));
    }
    if cfg.llm.response_format != "json_object" && cfg.llm.response_format != "text" {
        return Err(anyhow!(
            "invalid response format: use `json_object` or `text`"
        ));
    }
    if cfg.llm.request_timeout_secs == 0 {
        return Err(anyhow!("invalid request timeout: must be >= 1 second"));
    }
    if cfg.llm.provider == "openai-compatible" && cfg.llm.base_url.is_none() {
        return Err(anyhow!(
            "openai-compatible provider requires llm.base_url (or TREEAI_BASE_URL)"
        ));
    }
    let delay = cfg.analysis.delay_between_requests_secs;
    if !delay.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&delay) {
        return Err(anyhow!(
            "invalid request delay: require 0 <= delay <= {MAX_DELAY_SECS} seconds"
        ));
    }
    validate_folder_name(&cfg.output.checkpoint_folder)?;
    validate_report_name(&cfg.output.filename)?;
    Ok(())
}

/// Explicit path first, then `TREEAI_CONFIG_PATH`, then the working
/// directory, then the per-user config directory.
fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(custom) = env::var("TREEAI_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    for local in [LOCAL_CONFIG_FILE, LEGACY_CONFIG_FILE] {
        let candidate = PathBuf::from(local);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    config_home().map(|home| home.join("config.toml"))
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("json5"))
}

fn merge_legacy_json(base: &mut TreeAiConfig, legacy: LegacyJsonConfig) {
    if let Some(openai) = legacy.openai {
        base.llm.provider = "openai".to_string();
        if let Some(model) = openai.model {
            base.llm.model = model;
        }
        if let Some(temperature) = openai.temperature {
            base.llm.temperature = temperature;
        }
        if let Some(max) = openai.max_content_length {
            base.llm.max_content_length = max;
        }
        if let Some(format) = openai.response_format {
            base.llm.response_format = format;
        }
    }
    if let Some(prompt) = legacy.system_prompt {
        base.llm.system_prompt = prompt;
    }
    if let Some(analysis) = legacy.analysis {
        base.analysis.prompt_file = analysis.prompt_file.or(base.analysis.prompt_file.take());
        if let Some(v) = analysis.use_gitignore {
            base.analysis.use_gitignore = v;
        }
        if let Some(v) = analysis.exclude_hidden {
            base.analysis.exclude_hidden = v;
        }
        if let Some(v) = analysis.exclude_dirs {
            base.analysis.exclude_dirs = v;
        }
        if let Some(v) = analysis.exclude_files {
            base.analysis.exclude_files = v;
        }
        if let Some(v) = analysis.delay_between_requests {
            base.analysis.delay_between_requests_secs = v;
        }
    }
    if let Some(output) = legacy.output {
        if let Some(v) = output.filename {
            base.output.filename = v;
        }
        if let Some(v) = output.checkpoint_folder {
            base.output.checkpoint_folder = v;
        }
        if let Some(v) = output.cleanup_checkpoint {
            base.output.cleanup_checkpoint = v;
        }
    }
}

fn merge_file_config(base: &mut TreeAiConfig, explicit: Option<&Path>) -> Result<()> {
    let Some(path) = resolve_config_path(explicit) else {
        return Ok(());
    };
    if !path.exists() {
        if explicit.is_some() {
            return Err(TreeAiError::InvalidConfig(format!("{} not found", path.display())).into());
        }
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| TreeAiError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if is_json_path(&path) {
        let legacy: LegacyJsonConfig = json5::from_str(&raw)
            .map_err(|err| TreeAiError::InvalidConfig(format!("{}: {err}", path.display())))?;
        merge_legacy_json(base, legacy);
        return Ok(());
    }

    let parsed: PartialTreeAiConfig = toml::from_str(&raw)
        .map_err(|err| TreeAiError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(llm) = parsed.llm {
        base.llm = llm;
    }
    if let Some(analysis) = parsed.analysis {
        base.analysis = analysis;
    }
    if let Some(output) = parsed.output {
        base.output = output;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut TreeAiConfig) {
    cfg.llm.provider = env_or_string("TREEAI_PROVIDER", &cfg.llm.provider).to_ascii_lowercase();
    cfg.llm.model = env_or_string("TREEAI_MODEL", &cfg.llm.model);
    cfg.llm.base_url = env_optional_string("TREEAI_BASE_URL", cfg.llm.base_url.take());
    cfg.llm.temperature = env_or_f64("TREEAI_TEMPERATURE", cfg.llm.temperature);
    cfg.llm.max_content_length =
        env_or_u64("TREEAI_MAX_CONTENT_LENGTH", cfg.llm.max_content_length as u64) as usize;
    cfg.llm.response_format = env_or_string("TREEAI_RESPONSE_FORMAT", &cfg.llm.response_format);
    cfg.llm.request_timeout_secs =
        env_or_u64("TREEAI_REQUEST_TIMEOUT_SECS", cfg.llm.request_timeout_secs);

    cfg.analysis.prompt_file =
        env_optional_string("TREEAI_PROMPT_FILE", cfg.analysis.prompt_file.take());
    cfg.analysis.use_gitignore = env_or_bool("TREEAI_USE_GITIGNORE", cfg.analysis.use_gitignore);
    cfg.analysis.exclude_hidden =
        env_or_bool("TREEAI_EXCLUDE_HIDDEN", cfg.analysis.exclude_hidden);
    cfg.analysis.exclude_dirs = env_or_csv("TREEAI_EXCLUDE_DIRS", &cfg.analysis.exclude_dirs);
    cfg.analysis.exclude_files = env_or_csv("TREEAI_EXCLUDE_FILES", &cfg.analysis.exclude_files);
    cfg.analysis.delay_between_requests_secs =
        env_or_f64("TREEAI_DELAY_SECS", cfg.analysis.delay_between_requests_secs);

    cfg.output.filename = env_or_string("TREEAI_OUTPUT_FILE", &cfg.output.filename);
    cfg.output.checkpoint_folder =
        env_or_string("TREEAI_CHECKPOINT_FOLDER", &cfg.output.checkpoint_folder);
    cfg.output.cleanup_checkpoint =
        env_or_bool("TREEAI_CLEANUP_CHECKPOINT", cfg.output.cleanup_checkpoint);
    cfg.output.stop_on_write_error =
        env_or_bool("TREEAI_STOP_ON_WRITE_ERROR", cfg.output.stop_on_write_error);
}

pub fn load_config(explicit: Option<&Path>) -> Result<TreeAiConfig> {
    let mut cfg = TreeAiConfig::default();
    merge_file_config(&mut cfg, explicit)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg).map_err(|err| TreeAiError::InvalidConfig(format!("{err:#}")))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = TreeAiConfig::default();
        validate(&cfg).expect("defaults validate");
        assert_eq!(cfg.output.checkpoint_folder, ".tree-ai");
        assert!(cfg.output.cleanup_checkpoint);
    }

    #[test]
    fn partial_toml_sections_keep_field_defaults() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("tree-ai.toml");
        fs::write(
            &path,
            "[llm]\nprovider = \"anthropic\"\nmodel = \"claude-x\"\n\n[output]\ncleanup_checkpoint = false\n",
        )
        .expect("write config");

        let mut cfg = TreeAiConfig::default();
        merge_file_config(&mut cfg, Some(&path)).expect("merge");
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.llm.model, "claude-x");
        assert_eq!(cfg.llm.max_content_length, 20_000);
        assert!(!cfg.output.cleanup_checkpoint);
        assert_eq!(cfg.output.checkpoint_folder, ".tree-ai");
        assert_eq!(cfg.analysis, AnalysisConfig::default());
    }

    #[test]
    fn legacy_json_layout_is_understood() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{
                // comments are tolerated
                "openai": {"model": "gpt-4.1", "temperature": 0.5, "max_content_length": 900},
                "analysis": {"delay_between_requests": 0.25, "exclude_dirs": ["vendor"]},
                "output": {"filename": "out.md", "checkpoint_folder": ".ckpt"},
                "system_prompt": "be brief"
            }"#,
        )
        .expect("write config");

        let mut cfg = TreeAiConfig::default();
        merge_file_config(&mut cfg, Some(&path)).expect("merge");
        assert_eq!(cfg.llm.model, "gpt-4.1");
        assert_eq!(cfg.llm.max_content_length, 900);
        assert_eq!(cfg.llm.system_prompt, "be brief");
        assert_eq!(cfg.analysis.delay_between_requests_secs, 0.25);
        assert_eq!(cfg.analysis.exclude_dirs, vec!["vendor".to_string()]);
        assert_eq!(cfg.output.filename, "out.md");
        assert_eq!(cfg.output.checkpoint_folder, ".ckpt");
        assert!(cfg.output.cleanup_checkpoint);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let mut cfg = TreeAiConfig::default();
        let missing = tmp.path().join("nope.toml");
        assert!(merge_file_config(&mut cfg, Some(&missing)).is_err());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "[llm\nprovider=").expect("write");
        let mut cfg = TreeAiConfig::default();
        let err = merge_file_config(&mut cfg, Some(&path)).expect_err("bad toml");
        assert!(format!("{err:#}").contains("bad.toml"));
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut cfg = TreeAiConfig::default();
        cfg.llm.provider = "mystery".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = TreeAiConfig::default();
        cfg.llm.temperature = 3.5;
        assert!(validate(&cfg).is_err());

        let mut cfg = TreeAiConfig::default();
        cfg.analysis.delay_between_requests_secs = -1.0;
        assert!(validate(&cfg).is_err());

        let mut cfg = TreeAiConfig::default();
        cfg.analysis.delay_between_requests_secs = 1e30;
        assert!(validate(&cfg).is_err());
        cfg.analysis.delay_between_requests_secs = 86_400.0;
        assert!(validate(&cfg).is_ok());

        let mut cfg = TreeAiConfig::default();
        cfg.output.checkpoint_folder = "../elsewhere".to_string();
        assert!(validate(&cfg).is_err());

        for bad in ["", "  ", "sub/out.md", "../out.md", "/tmp/out.md", ".."] {
            let mut cfg = TreeAiConfig::default();
            cfg.output.filename = bad.to_string();
            assert!(validate(&cfg).is_err(), "accepted report name {bad:?}");
        }

        let mut cfg = TreeAiConfig::default();
        cfg.llm.provider = "openai-compatible".to_string();
        assert!(validate(&cfg).is_err());
        cfg.llm.base_url = Some("http://localhost:8080".to_string());
        assert!(validate(&cfg).is_ok());
    }
}
