use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::env;
use std::time::Duration;

use crate::error::TreeAiError;
use crate::treeai::config::LlmConfig;
use crate::treeai::util::truncate_with_ellipsis;

const ANTHROPIC_MAX_TOKENS: u32 = 1200;
const LOCAL_SUMMARY_CHARS: usize = 120;

/// One system + user exchange.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f64,
    pub json_response: bool,
}

pub trait ModelClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String>;
    fn model_id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    OpenAiCompatible,
    Local,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::OpenAiCompatible => "openai-compatible",
            Provider::Local => "local",
        }
    }

    fn api_key_var(self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::OpenAiCompatible => Some("TREEAI_API_KEY"),
            Provider::Local => None,
        }
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

pub fn parse_provider_alias(raw: &str) -> Option<Provider> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "openai" => Some(Provider::OpenAi),
        "anthropic" | "claude" => Some(Provider::Anthropic),
        "gemini" | "google" => Some(Provider::Gemini),
        "openai-compatible" | "compatible" => Some(Provider::OpenAiCompatible),
        "local" => Some(Provider::Local),
        _ => None,
    }
}

/// `anthropic:claude-x` selects the provider from the model string itself.
pub fn parse_prefixed_model(raw: &str) -> (Option<Provider>, String) {
    let trimmed = raw.trim();
    if let Some((prefix, model)) = trimmed.split_once(':')
        && let Some(provider) = parse_provider_alias(prefix)
    {
        return (Some(provider), model.trim().to_string());
    }
    (None, trimmed.to_string())
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn extract_chat_completion_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let chunks: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

fn extract_anthropic_text(json: &Value) -> Option<String> {
    let content = json.get("content").and_then(Value::as_array)?;
    let chunks: Vec<&str> = content
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_gemini_text(json: &Value) -> Option<String> {
    json.get("candidates")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn chat_payload(model: &str, request: &ChatRequest<'_>) -> Value {
    let mut payload = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": request.user}
        ],
        "temperature": request.temperature
    });
    if request.json_response {
        payload["response_format"] = serde_json::json!({"type": "json_object"});
    }
    payload
}

pub struct OpenAiClient {
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl ModelClient for OpenAiClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let response = http_client(self.timeout_secs)?
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&chat_payload(&self.model, request))
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("openai call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_chat_completion_text(&json).context("openai response missing text content")
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

pub struct OpenAiCompatClient {
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl ModelClient for OpenAiCompatClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/chat/completions");
        let response = http_client(self.timeout_secs)?
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&chat_payload(&self.model, request))
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!(
                "openai-compatible call failed with status {}",
                response.status()
            );
        }
        let json: Value = response.json()?;
        extract_chat_completion_text(&json)
            .context("openai-compatible response missing text content")
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

pub struct AnthropicClient {
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl ModelClient for AnthropicClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [
                {"role": "user", "content": request.user}
            ]
        });
        let response = http_client(self.timeout_secs)?
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("anthropic call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_anthropic_text(&json).context("anthropic response missing text content")
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

pub struct GeminiClient {
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl ModelClient for GeminiClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let mut generation = serde_json::json!({"temperature": request.temperature});
        if request.json_response {
            generation["responseMimeType"] = Value::from("application/json");
        }
        let payload = serde_json::json!({
            "systemInstruction": {"parts": [{"text": request.system}]},
            "contents": [{"role": "user", "parts": [{"text": request.user}]}],
            "generationConfig": generation
        });
        let response = http_client(self.timeout_secs)?
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("gemini call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_gemini_text(&json).context("gemini response missing text content")
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Offline stand-in that describes a file from its own text. No network.
pub struct LocalClient {
    model: String,
}

impl LocalClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

fn fenced_content(user: &str) -> &str {
    let Some((_, rest)) = user.split_once("File Content:\n```\n") else {
        return "";
    };
    rest.strip_suffix("\n```").unwrap_or(rest)
}

fn local_summary(user: &str) -> String {
    let path = user
        .lines()
        .find_map(|line| line.strip_prefix("File Path: "))
        .unwrap_or("unknown file");
    let name = path.rsplit('/').next().unwrap_or(path);
    let content = fenced_content(user);
    let line_count = content.lines().count();
    let first = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate_with_ellipsis(line, LOCAL_SUMMARY_CHARS))
        .unwrap_or_default();
    if first.is_empty() {
        format!("{name} has {line_count} lines and no readable text.")
    } else {
        format!("{name} has {line_count} lines and begins with: {first}")
    }
}

impl ModelClient for LocalClient {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let summary = local_summary(request.user);
        if request.json_response {
            Ok(serde_json::json!({ "explication": summary }).to_string())
        } else {
            Ok(summary)
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn require_key(provider: Provider) -> Result<String> {
    let Some(var) = provider.api_key_var() else {
        return Ok(String::new());
    };
    env_non_empty(var).ok_or_else(|| {
        TreeAiError::MissingApiKey {
            provider: provider.label(),
            env_var: var,
        }
        .into()
    })
}

/// Build the client named by the configuration. Missing credentials fail
/// here, before any file is touched.
pub fn build_client(cfg: &LlmConfig) -> Result<Box<dyn ModelClient>> {
    let (prefixed, model) = parse_prefixed_model(&cfg.model);
    let provider = match prefixed {
        Some(provider) => provider,
        None => parse_provider_alias(&cfg.provider)
            .with_context(|| format!("unknown llm provider `{}`", cfg.provider))?,
    };
    let timeout_secs = cfg.request_timeout_secs;
    let client: Box<dyn ModelClient> = match provider {
        Provider::OpenAi => Box::new(OpenAiClient {
            model,
            api_key: require_key(provider)?,
            timeout_secs,
        }),
        Provider::Anthropic => Box::new(AnthropicClient {
            model,
            api_key: require_key(provider)?,
            timeout_secs,
        }),
        Provider::Gemini => Box::new(GeminiClient {
            model,
            api_key: require_key(provider)?,
            timeout_secs,
        }),
        Provider::OpenAiCompatible => {
            let base_url = cfg
                .base_url
                .clone()
                .context("openai-compatible provider requires llm.base_url")?;
            Box::new(OpenAiCompatClient {
                model,
                api_key: require_key(provider)?,
                base_url,
                timeout_secs,
            })
        }
        Provider::Local => Box::new(LocalClient::new(model)),
    };
    Ok(client)
}
