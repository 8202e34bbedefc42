use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use vigil_types::{Result, VigilError};

use crate::discord::DiscordProvider;
use crate::teams::TeamsProvider;
use crate::telegram::TelegramProvider;
use crate::traits::{NotificationProvider, ProviderSchema};

/// Lazy notification-provider registry, keyed by provider name.
pub struct NotificationRegistry {
    instances: Mutex<HashMap<String, Arc<dyn NotificationProvider>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn NotificationProvider>> {
        let mut cache = self.instances.lock();
        if let Some(provider) = cache.get(name) {
            return Ok(provider.clone());
        }
        let provider: Arc<dyn NotificationProvider> = match name {
            "telegram" => Arc::new(TelegramProvider::new()),
            "discord" => Arc::new(DiscordProvider::new()),
            "teams" => Arc::new(TeamsProvider::new()),
            _ => return Err(VigilError::ProviderNotFound(name.to_string())),
        };
        cache.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    pub fn list_names(&self) -> Vec<&'static str> {
        vec!["telegram", "discord", "teams"]
    }

    pub fn list_schemas(&self) -> Vec<ProviderSchema> {
        self.list_names()
            .into_iter()
            .filter_map(|name| self.get(name).ok())
            .map(|provider| provider.schema())
            .collect()
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_resolve_and_cache() {
        let registry = NotificationRegistry::new();
        let a = registry.get("telegram").unwrap();
        let b = registry.get("telegram").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.get("discord").unwrap().name(), "discord");
        assert_eq!(registry.get("teams").unwrap().name(), "teams");
    }

    #[test]
    fn unknown_provider_errors() {
        let registry = NotificationRegistry::new();
        assert!(matches!(
            registry.get("matrix"),
            Err(VigilError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn schemas_cover_all_providers() {
        let registry = NotificationRegistry::new();
        let schemas = registry.list_schemas();
        assert_eq!(schemas.len(), 3);
        assert!(schemas.iter().all(|s| !s.required_credentials.is_empty()));
    }
}
