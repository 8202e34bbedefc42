use std::path::PathBuf;

use serde::Serialize;

use vigil_types::{ModelTier, Result, VigilError};

/// What an agent CLI can and cannot do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub plan_mode: bool,
    pub resume: bool,
    pub streaming: bool,
    pub autonomous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomous_flag: Option<&'static str>,
    pub models: Vec<&'static str>,
}

/// Everything a provider needs to build one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: ModelTier,
    pub timeout: u64,
    pub session_id: Option<String>,
    pub autonomous: bool,
    pub plan_mode: bool,
    pub max_turns: Option<u32>,
    pub allowed_tools: Vec<String>,
    pub append_system_prompt: Option<String>,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: ModelTier::Medium,
            timeout: 300,
            session_id: None,
            autonomous: false,
            plan_mode: false,
            max_turns: None,
            allowed_tools: Vec::new(),
            append_system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub capabilities: Capabilities,
    pub is_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
}

/// Streaming parse state, fed one stdout line at a time.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    deltas: String,
    assistant_text: String,
    result_text: Option<String>,
    errors: Vec<String>,
    session_id: Option<String>,
}

impl OutputAccumulator {
    pub fn push_delta(&mut self, text: &str) {
        self.deltas.push_str(text);
    }

    pub fn push_assistant_text(&mut self, text: &str) {
        self.assistant_text.push_str(text);
    }

    pub fn set_result(&mut self, text: &str) {
        self.result_text = Some(text.to_string());
    }

    pub fn push_error(&mut self, text: &str) {
        self.errors.push(text.to_string());
    }

    /// First session id seen wins; later repeats are ignored.
    pub fn observe_session(&mut self, id: &str) {
        if self.session_id.is_none() && !id.is_empty() {
            self.session_id = Some(id.to_string());
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Incremental deltas win; the terminal `result` covers streams that
    /// never emitted deltas; assistant text and errors are last resorts.
    pub fn text(&self) -> String {
        if !self.deltas.is_empty() {
            return self.deltas.clone();
        }
        if let Some(result) = &self.result_text {
            if !result.is_empty() {
                return result.clone();
            }
        }
        if !self.assistant_text.is_empty() {
            return self.assistant_text.clone();
        }
        self.errors.join("\n")
    }
}

/// Adapter over one agent CLI: command construction, stream parsing and
/// capability-driven request validation.
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;

    /// Discover the agent binary via an env override or PATH.
    fn executable(&self) -> Result<PathBuf>;

    /// API-key variable deliberately unset in the child environment so the
    /// agent runs in interactive-auth mode.
    fn api_key_env(&self) -> &'static str;

    fn model_id(&self, tier: ModelTier) -> &'static str;

    fn build_command(&self, request: &ExecutionRequest) -> Result<Vec<String>>;

    fn parse_line(&self, line: &str, acc: &mut OutputAccumulator);

    fn parse_output(&self, raw: &str) -> (String, Option<String>) {
        let mut acc = OutputAccumulator::default();
        for line in raw.lines() {
            self.parse_line(line, &mut acc);
        }
        let session_id = acc.session_id().map(|s| s.to_string());
        (acc.text(), session_id)
    }

    /// Reject requests the capability matrix cannot honor.
    fn validate_request(&self, request: &ExecutionRequest) -> Result<()> {
        let caps = self.capabilities();
        if request.plan_mode && !caps.plan_mode {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("provider '{}' does not support plan mode", self.name()),
            });
        }
        if request.session_id.is_some() && !caps.resume {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("provider '{}' does not support session resume", self.name()),
            });
        }
        if request.autonomous && !caps.autonomous {
            return Err(VigilError::Validation {
                task: None,
                reason: format!("provider '{}' does not support autonomous mode", self.name()),
            });
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.executable().is_ok()
    }

    fn info(&self) -> ProviderInfo {
        let executable_path = self
            .executable()
            .ok()
            .map(|p| p.to_string_lossy().to_string());
        ProviderInfo {
            name: self.name(),
            display_name: self.display_name(),
            description: self.description(),
            capabilities: self.capabilities(),
            is_available: executable_path.is_some(),
            executable_path,
        }
    }
}

/// Scan PATH for a binary, honoring an explicit env override first.
pub fn find_executable(binary: &str, override_var: &str) -> Result<PathBuf> {
    if let Ok(explicit) = std::env::var(override_var) {
        let path = PathBuf::from(explicit.trim());
        if path.is_file() {
            return Ok(path);
        }
    }
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(VigilError::Provider {
        provider: binary.to_string(),
        detail: format!("executable '{binary}' not found on PATH (set {override_var} to override)"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProvider {
        caps: Capabilities,
    }

    impl AgentProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn display_name(&self) -> &'static str {
            "Mock"
        }
        fn description(&self) -> &'static str {
            "test double"
        }
        fn capabilities(&self) -> Capabilities {
            self.caps.clone()
        }
        fn executable(&self) -> Result<PathBuf> {
            Ok(PathBuf::from("/bin/true"))
        }
        fn api_key_env(&self) -> &'static str {
            "MOCK_API_KEY"
        }
        fn model_id(&self, _tier: ModelTier) -> &'static str {
            "mock-1"
        }
        fn build_command(&self, request: &ExecutionRequest) -> Result<Vec<String>> {
            Ok(vec!["mock".into(), "-p".into(), request.prompt.clone()])
        }
        fn parse_line(&self, line: &str, acc: &mut OutputAccumulator) {
            acc.push_delta(line);
        }
    }

    #[test]
    fn default_validation_follows_capabilities() {
        let provider = MockProvider {
            caps: Capabilities::default(),
        };
        let mut request = ExecutionRequest::new("hi", "/tmp");

        request.plan_mode = true;
        assert!(provider.validate_request(&request).is_err());
        request.plan_mode = false;

        request.session_id = Some("s1".into());
        assert!(provider.validate_request(&request).is_err());
        request.session_id = None;

        request.autonomous = true;
        assert!(provider.validate_request(&request).is_err());
        request.autonomous = false;

        assert!(provider.validate_request(&request).is_ok());
    }

    #[test]
    fn accumulator_prefers_deltas_then_result() {
        let mut acc = OutputAccumulator::default();
        acc.set_result("final");
        assert_eq!(acc.text(), "final");
        acc.push_delta("a");
        acc.push_delta("b");
        assert_eq!(acc.text(), "ab");
    }

    #[test]
    fn first_session_id_wins() {
        let mut acc = OutputAccumulator::default();
        acc.observe_session("");
        assert!(acc.session_id().is_none());
        acc.observe_session("first");
        acc.observe_session("second");
        assert_eq!(acc.session_id(), Some("first"));
    }

    #[test]
    fn info_reports_availability() {
        let provider = MockProvider {
            caps: Capabilities::default(),
        };
        let info = provider.info();
        assert_eq!(info.name, "mock");
        assert!(info.is_available);
        assert_eq!(info.executable_path.as_deref(), Some("/bin/true"));
    }
}
