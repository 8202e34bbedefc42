use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_types::Result;

fn default_true() -> bool {
    true
}

/// Notification-target descriptor. Secrets live behind `credential_id` in
/// the credential store; `config` carries only non-secret settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    pub credential_id: String,
}

impl Channel {
    /// Config value as a string, accepting YAML strings and numbers.
    pub fn config_str(&self, key: &str) -> Option<String> {
        match self.config.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelsFile {
    #[serde(default)]
    channels: Vec<Channel>,
}

/// Channel descriptors loaded from a single YAML document.
pub struct ChannelStore {
    path: PathBuf,
    channels: RwLock<Vec<Channel>>,
}

impl ChannelStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let channels = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: ChannelsFile = serde_yaml::from_str(&raw)?;
            file.channels
        } else {
            Vec::new()
        };
        debug!(count = channels.len(), "loaded channel file");
        Ok(Self {
            path,
            channels: RwLock::new(channels),
        })
    }

    pub fn reload(&self) -> Result<()> {
        let fresh = Self::load(self.path.clone())?;
        *self.channels.write() = fresh.channels.into_inner();
        Ok(())
    }

    pub fn find_all(&self) -> Vec<Channel> {
        self.channels.read().clone()
    }

    pub fn find_enabled(&self) -> Vec<Channel> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Channel> {
        self.channels.read().iter().find(|c| c.id == id).cloned()
    }
}
