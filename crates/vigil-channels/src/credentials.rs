use std::collections::HashMap;

use vigil_types::{Result, VigilError};

use crate::traits::Credentials;

/// Resolves a channel's `credential_id` to its secret map. Secrets are
/// resolved per dispatch and never cached or written back.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, credential_id: &str) -> Result<Credentials>;
}

/// OS-keyring backed store: one keyring entry per credential id, holding a
/// JSON object of secret key/value pairs.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: "vigil".to_string(),
        }
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn resolve(&self, credential_id: &str) -> Result<Credentials> {
        let entry = keyring::Entry::new(&self.service, credential_id).map_err(|e| {
            VigilError::Provider {
                provider: "keyring".into(),
                detail: format!("cannot open entry '{credential_id}': {e}"),
            }
        })?;
        let raw = entry.get_password().map_err(|e| VigilError::Provider {
            provider: "keyring".into(),
            detail: format!("no secret for '{credential_id}': {e}"),
        })?;
        let map: Credentials = serde_json::from_str(&raw)?;
        Ok(map)
    }
}

/// In-memory store for tests and for environments without a keyring.
#[derive(Default)]
pub struct StaticCredentialStore {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential_id: impl Into<String>, secrets: Credentials) {
        self.entries.insert(credential_id.into(), secrets);
    }
}

impl CredentialStore for StaticCredentialStore {
    fn resolve(&self, credential_id: &str) -> Result<Credentials> {
        self.entries
            .get(credential_id)
            .cloned()
            .ok_or_else(|| VigilError::Provider {
                provider: "credentials".into(),
                detail: format!("unknown credential id '{credential_id}'"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_store_round_trip() {
        let mut store = StaticCredentialStore::new();
        let mut secrets = Credentials::new();
        secrets.insert("bot_token".into(), "123:abc".into());
        store.insert("tg", secrets);

        let resolved = store.resolve("tg").unwrap();
        assert_eq!(resolved.get("bot_token").map(String::as_str), Some("123:abc"));
        assert!(store.resolve("missing").is_err());
    }
}
