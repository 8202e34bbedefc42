//! OpenAI Codex CLI adapter.
//!
//! Narrower capability matrix than the claude adapter: no plan mode and no
//! session resume. Autonomous runs use `--full-auto`. Output is JSON lines
//! with `type` of `message`, `result` or `error`.

use std::path::PathBuf;

use serde_json::Value;

use vigil_types::{ModelTier, Result, VigilError};

use crate::provider::{find_executable, AgentProvider, Capabilities, ExecutionRequest, OutputAccumulator};

pub struct CodexAdapter;

impl CodexAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentProvider for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn display_name(&self) -> &'static str {
        "OpenAI Codex"
    }

    fn description(&self) -> &'static str {
        "OpenAI's coding agent CLI with autonomous execution support"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            plan_mode: false,
            resume: false,
            streaming: true,
            autonomous: true,
            autonomous_flag: Some("--full-auto"),
            models: vec!["gpt-4o", "gpt-4o-mini", "o1"],
        }
    }

    fn executable(&self) -> Result<PathBuf> {
        find_executable("codex", "VIGIL_CODEX_BIN")
    }

    fn api_key_env(&self) -> &'static str {
        "OPENAI_API_KEY"
    }

    fn model_id(&self, tier: ModelTier) -> &'static str {
        match tier {
            ModelTier::Small => "gpt-4o-mini",
            ModelTier::Medium => "gpt-4o",
            ModelTier::Large => "o1",
        }
    }

    fn validate_request(&self, request: &ExecutionRequest) -> Result<()> {
        if request.plan_mode {
            return Err(VigilError::Validation {
                task: None,
                reason: "codex does not support plan mode; use a claude-style provider".into(),
            });
        }
        if request.session_id.is_some() {
            return Err(VigilError::Validation {
                task: None,
                reason: "codex does not support session resume; use a claude-style provider".into(),
            });
        }
        Ok(())
    }

    fn build_command(&self, request: &ExecutionRequest) -> Result<Vec<String>> {
        self.validate_request(request)?;
        let executable = self.executable()?;
        let mut cmd = vec![executable.to_string_lossy().to_string(), "exec".into()];
        cmd.push("--prompt".into());
        cmd.push(request.prompt.clone());
        cmd.push("--model".into());
        cmd.push(self.model_id(request.model).into());
        if request.autonomous {
            cmd.push("--full-auto".into());
        }
        cmd.push("--json".into());
        Ok(cmd)
    }

    fn parse_line(&self, line: &str, acc: &mut OutputAccumulator) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        match value.get("type").and_then(Value::as_str).unwrap_or_default() {
            "message" => push_content(&value, acc),
            "result" => {
                if let Some(text) = value.get("content").and_then(Value::as_str) {
                    acc.set_result(text);
                } else if let Some(text) = value.get("result").and_then(Value::as_str) {
                    acc.set_result(text);
                }
            }
            "error" => {
                if let Some(text) = value
                    .get("message")
                    .or_else(|| value.get("content"))
                    .and_then(Value::as_str)
                {
                    acc.push_error(text);
                }
            }
            _ => {}
        }
    }
}

fn push_content(value: &Value, acc: &mut OutputAccumulator) {
    match value.get("content") {
        Some(Value::String(text)) => acc.push_delta(text),
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    acc.push_delta(text);
                }
            }
        }
        _ => {}
    }
}
