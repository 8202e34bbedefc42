use std::path::Path;

use serde::{Deserialize, Serialize};

use vigil_types::Result;

fn default_max_concurrent() -> usize {
    1
}

fn default_tick_interval() -> u64 {
    30
}

fn default_due_window() -> u64 {
    60
}

fn default_approval_ttl() -> u64 {
    24
}

fn default_poll_timeout() -> u64 {
    30
}

/// Engine configuration, loaded from `config.yaml` with `VIGIL_*` environment
/// overrides layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum executions in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Seconds between scheduler ticks in serve mode.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Due-task lookback window in seconds.
    #[serde(default = "default_due_window")]
    pub due_window_secs: u64,
    /// Hours before a pending approval expires.
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_hours: u64,
    /// Long-poll timeout for interactive callback polling.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Dashboard base URL, used by webhook providers that can only degrade
    /// interactive buttons to links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_secs: default_tick_interval(),
            due_window_secs: default_due_window(),
            approval_ttl_hours: default_approval_ttl(),
            poll_timeout_secs: default_poll_timeout(),
            dashboard_url: None,
        }
    }
}

impl EngineConfig {
    /// Read the config file if present, then layer environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("VIGIL_MAX_CONCURRENT") {
            self.max_concurrent = v;
        }
        if let Some(v) = env_parse("VIGIL_TICK_INTERVAL_SECS") {
            self.tick_interval_secs = v;
        }
        if let Some(v) = env_parse("VIGIL_DUE_WINDOW_SECS") {
            self.due_window_secs = v;
        }
        if let Some(v) = env_parse("VIGIL_APPROVAL_TTL_HOURS") {
            self.approval_ttl_hours = v;
        }
        if let Ok(v) = std::env::var("VIGIL_DASHBOARD_URL") {
            if !v.trim().is_empty() {
                self.dashboard_url = Some(v);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.due_window_secs, 60);
        assert_eq!(config.approval_ttl_hours, 24);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::load(&tmp.path().join("nope.yaml")).unwrap();
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "max_concurrent: 4\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.tick_interval_secs, 30);
    }
}
