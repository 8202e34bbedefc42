use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use vigil_types::{Result, VigilError};

use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::provider::{AgentProvider, ProviderInfo};

pub const DEFAULT_PROVIDER: &str = "claude";

/// Lazy agent-provider registry: adapters instantiate on first lookup and
/// are cached for the life of the process.
pub struct AgentRegistry {
    instances: Mutex<HashMap<String, Arc<dyn AgentProvider>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentProvider>> {
        let mut cache = self.instances.lock();
        if let Some(provider) = cache.get(name) {
            return Ok(provider.clone());
        }
        let provider: Arc<dyn AgentProvider> = match name {
            "claude" => Arc::new(ClaudeAdapter::new()),
            "codex" => Arc::new(CodexAdapter::new()),
            _ => return Err(VigilError::ProviderNotFound(name.to_string())),
        };
        cache.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    /// Resolve a task's provider choice, falling back to the default.
    pub fn get_or_default(&self, name: Option<&str>) -> Result<Arc<dyn AgentProvider>> {
        self.get(name.unwrap_or(DEFAULT_PROVIDER))
    }

    pub fn list_names(&self) -> Vec<&'static str> {
        vec!["claude", "codex"]
    }

    pub fn list_info(&self) -> Vec<ProviderInfo> {
        self.list_names()
            .into_iter()
            .filter_map(|name| self.get(name).ok())
            .map(|provider| provider.info())
            .collect()
    }

    pub fn get_available(&self) -> Vec<Arc<dyn AgentProvider>> {
        self.list_names()
            .into_iter()
            .filter_map(|name| self.get(name).ok())
            .filter(|provider| provider.is_available())
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_resolve() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.get("claude").unwrap().name(), "claude");
        assert_eq!(registry.get("codex").unwrap().name(), "codex");
    }

    #[test]
    fn unknown_provider_is_a_typed_error() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.get("nonexistent"),
            Err(VigilError::ProviderNotFound(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn instances_are_cached() {
        let registry = AgentRegistry::new();
        let a = registry.get("claude").unwrap();
        let b = registry.get("claude").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn default_fallback() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.get_or_default(None).unwrap().name(), "claude");
        assert_eq!(
            registry.get_or_default(Some("codex")).unwrap().name(),
            "codex"
        );
    }

    #[test]
    fn info_covers_both_adapters() {
        let registry = AgentRegistry::new();
        let infos = registry.list_info();
        assert_eq!(infos.len(), 2);
        let claude = infos.iter().find(|i| i.name == "claude").unwrap();
        assert!(claude.capabilities.plan_mode);
        let codex = infos.iter().find(|i| i.name == "codex").unwrap();
        assert!(!codex.capabilities.plan_mode);
    }
}
