use anyhow::Result;
use serde_json::Value;
use std::fs;

use crate::error::WarnCode;
use crate::llm::client::{ChatRequest, ModelClient};
use crate::treeai::config::LlmConfig;
use crate::treeai::prompt::build_user_message;
use crate::treeai::util::{truncate_content, truncate_with_ellipsis};
use crate::treeai::warn::{self, WarnEvent};

const EMPTY_FILE: &str = "Empty file";
const NO_EXPLANATION: &str = "No explication provided";

/// What gets persisted for one file. A failed analysis still produces one,
/// with the failure described in `explanation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub explanation: String,
    pub content: String,
    pub degraded: bool,
}

pub trait Analyzer {
    fn analyze(&self, file_path: &str) -> Analysis;
    fn model_id(&self) -> &str;
}

pub struct LlmAnalyzer {
    client: Box<dyn ModelClient>,
    prompt: String,
    system_prompt: String,
    temperature: f64,
    max_content_length: usize,
    json_response: bool,
}

impl LlmAnalyzer {
    pub fn new(client: Box<dyn ModelClient>, cfg: &LlmConfig, prompt: String) -> Self {
        Self {
            client,
            prompt,
            system_prompt: cfg.system_prompt.clone(),
            temperature: cfg.temperature,
            max_content_length: cfg.max_content_length,
            json_response: cfg.response_format == "json_object",
        }
    }

    fn request(&self, file_path: &str, content: &str) -> Result<String> {
        let user = build_user_message(&self.prompt, file_path, content);
        self.client.complete(&ChatRequest {
            system: &self.system_prompt,
            user: &user,
            temperature: self.temperature,
            json_response: self.json_response,
        })
    }
}

fn warn_degraded(file_path: &str, reason: &str, err: &str) {
    warn::emit(WarnEvent {
        code: WarnCode::W012AnalyzerFailed,
        stage: "analyze",
        action: "explain-file",
        path: file_path,
        retry: "delete-result-record",
        reason,
        err: &truncate_with_ellipsis(err, 200),
    });
}

/// Pull the explanation out of a JSON reply.
pub fn parse_json_reply(raw: &str) -> std::result::Result<String, serde_json::Error> {
    let value: Value = serde_json::from_str(raw.trim())?;
    let text = value
        .get("explication")
        .or_else(|| value.get("explanation"))
        .and_then(Value::as_str)
        .unwrap_or(NO_EXPLANATION);
    Ok(text.to_string())
}

impl Analyzer for LlmAnalyzer {
    fn analyze(&self, file_path: &str) -> Analysis {
        let raw = match fs::read_to_string(file_path) {
            Ok(raw) => raw,
            Err(err) => {
                warn_degraded(file_path, "read-failed", &err.to_string());
                return Analysis {
                    explanation: format!("Error analyzing file: {err}"),
                    content: String::new(),
                    degraded: true,
                };
            }
        };
        if raw.trim().is_empty() {
            return Analysis {
                explanation: EMPTY_FILE.to_string(),
                content: String::new(),
                degraded: false,
            };
        }

        let content = truncate_content(&raw, self.max_content_length);
        let reply = match self.request(file_path, &content) {
            Ok(reply) => reply,
            Err(err) => {
                let err = format!("{err:#}");
                warn_degraded(file_path, "request-failed", &err);
                return Analysis {
                    explanation: format!("Error analyzing file: {err}"),
                    content: String::new(),
                    degraded: true,
                };
            }
        };

        if !self.json_response {
            return Analysis {
                explanation: reply.trim().to_string(),
                content,
                degraded: false,
            };
        }
        match parse_json_reply(&reply) {
            Ok(explanation) => Analysis {
                explanation,
                content,
                degraded: false,
            },
            Err(err) => {
                warn_degraded(file_path, "unparseable-reply", &err.to_string());
                Analysis {
                    explanation: format!("Failed to parse AI response: {err}"),
                    content,
                    degraded: true,
                }
            }
        }
    }

    fn model_id(&self) -> &str {
        self.client.model_id()
    }
}
