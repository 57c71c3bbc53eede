use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const BUILTIN_PROMPT: &str = "Explain the purpose of the following file in a single concise paragraph. \
Describe what it contains, the role it plays in the project and any notable dependencies or side effects. \
Respond with a JSON object: {\"explication\": \"<your explanation>\"}.";

/// Instruction text sent ahead of every file.
pub fn load_prompt(prompt_file: Option<&str>) -> Result<String> {
    let Some(path) = prompt_file else {
        return Ok(BUILTIN_PROMPT.to_string());
    };
    let raw = fs::read_to_string(Path::new(path))
        .with_context(|| format!("prompt file {path} not found or unreadable"))?;
    Ok(raw.trim().to_string())
}

pub fn build_user_message(prompt: &str, file_path: &str, content: &str) -> String {
    format!("{prompt}\n\nFile Path: {file_path}\n\nFile Content:\n```\n{content}\n```")
}
