//! Claude Code CLI adapter.
//!
//! Supports the full capability set: plan mode, session resume, streaming
//! output and autonomous execution. Output is a stream-JSON line protocol;
//! the session id rides on `system` messages (and most others), text arrives
//! as `content_block_delta` events with a terminal `result` fallback.

use std::path::PathBuf;

use serde_json::Value;

use vigil_types::{ModelTier, Result};

use crate::provider::{find_executable, AgentProvider, Capabilities, ExecutionRequest, OutputAccumulator};

pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentProvider for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn description(&self) -> &'static str {
        "Anthropic's coding agent CLI with plan mode and session resume"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            plan_mode: true,
            resume: true,
            streaming: true,
            autonomous: true,
            autonomous_flag: Some("--dangerously-skip-permissions"),
            models: vec!["haiku", "sonnet", "opus"],
        }
    }

    fn executable(&self) -> Result<PathBuf> {
        find_executable("claude", "VIGIL_CLAUDE_BIN")
    }

    fn api_key_env(&self) -> &'static str {
        "ANTHROPIC_API_KEY"
    }

    fn model_id(&self, tier: ModelTier) -> &'static str {
        match tier {
            ModelTier::Small => "haiku",
            ModelTier::Medium => "sonnet",
            ModelTier::Large => "opus",
        }
    }

    fn build_command(&self, request: &ExecutionRequest) -> Result<Vec<String>> {
        let executable = self.executable()?;
        let mut cmd = vec![executable.to_string_lossy().to_string()];

        let resuming = request.session_id.is_some();
        if let Some(session_id) = &request.session_id {
            cmd.push("--resume".into());
            cmd.push(session_id.clone());
        }
        if let Some(system_prompt) = &request.append_system_prompt {
            cmd.push("--append-system-prompt".into());
            cmd.push(system_prompt.clone());
        }
        cmd.push("-p".into());
        cmd.push(request.prompt.clone());
        if request.plan_mode {
            cmd.push("--permission-mode".into());
            cmd.push("plan".into());
        }
        if request.autonomous {
            cmd.push("--dangerously-skip-permissions".into());
        }
        cmd.push("--output-format".into());
        cmd.push("stream-json".into());
        cmd.push("--verbose".into());
        cmd.push("--include-partial-messages".into());

        // Resumed sessions keep the model and limits they started with.
        if !resuming {
            cmd.push("--model".into());
            cmd.push(self.model_id(request.model).into());
            if let Some(max_turns) = request.max_turns {
                cmd.push("--max-turns".into());
                cmd.push(max_turns.to_string());
            }
            if !request.allowed_tools.is_empty() {
                cmd.push("--allowedTools".into());
                cmd.push(request.allowed_tools.join(","));
            }
        }

        Ok(cmd)
    }

    fn parse_line(&self, line: &str, acc: &mut OutputAccumulator) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            // Non-JSON noise on stdout is ignored.
            return;
        };

        if let Some(session_id) = value.get("session_id").and_then(Value::as_str) {
            acc.observe_session(session_id);
        }
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            acc.push_error(error);
        }

        match value.get("type").and_then(Value::as_str).unwrap_or_default() {
            "stream_event" => {
                let event = &value["event"];
                if event.get("type").and_then(Value::as_str) == Some("content_block_delta") {
                    if let Some(text) = event["delta"].get("text").and_then(Value::as_str) {
                        acc.push_delta(text);
                    }
                }
            }
            "assistant" => {
                if let Some(blocks) = value["message"].get("content").and_then(Value::as_array) {
                    for block in blocks {
                        if block.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                acc.push_assistant_text(text);
                            }
                        }
                    }
                }
            }
            "result" => {
                if let Some(text) = value.get("result").and_then(Value::as_str) {
                    acc.set_result(text);
                }
            }
            _ => {}
        }
    }
}
