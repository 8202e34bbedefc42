use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use vigil_types::{Result, VigilError};

use crate::config::Channel;

/// Secret map resolved from the credential store; never persisted.
pub type Credentials = HashMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Edit this message in place instead of sending a new one.
    pub message_id: Option<String>,
    pub disable_notification: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

/// Declarative description of what a provider needs to be configured.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSchema {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub required_credentials: Vec<FieldSpec>,
    pub required_config: Vec<FieldSpec>,
    pub optional_config: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
pub struct InteractiveButton {
    pub label: String,
    /// Opaque token of the form `plan:<action>:<approval_id>`.
    pub callback_data: String,
}

#[derive(Debug, Clone)]
pub struct InteractiveMessage {
    pub text: String,
    pub buttons: Vec<InteractiveButton>,
}

/// Adapter over one chat platform.
///
/// `send` is mandatory; interactive messages, edits and button removal are
/// optional capabilities that default to an `unsupported` error so webhook
/// providers stay honest.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn schema(&self) -> ProviderSchema;

    fn supports_interactive(&self) -> bool {
        false
    }

    fn supports_editing(&self) -> bool {
        false
    }

    /// Adapt dispatcher-produced HTML to the platform's dialect.
    fn format_message(&self, text: &str) -> String {
        text.to_string()
    }

    fn validate_config(
        &self,
        _config: &HashMap<String, serde_json::Value>,
    ) -> std::result::Result<(), String> {
        Ok(())
    }

    fn validate_credentials(&self, credentials: &Credentials) -> std::result::Result<(), String>;

    async fn send(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        text: &str,
        opts: &SendOptions,
    ) -> Result<SendOutcome>;

    async fn send_interactive(
        &self,
        _channel: &Channel,
        _credentials: &Credentials,
        _message: &InteractiveMessage,
    ) -> Result<SendOutcome> {
        Err(self.unsupported("interactive messages"))
    }

    async fn edit(
        &self,
        _channel: &Channel,
        _credentials: &Credentials,
        _message_id: &str,
        _text: &str,
    ) -> Result<()> {
        Err(self.unsupported("message editing"))
    }

    /// Strip buttons from a previously sent interactive message, optionally
    /// replacing its text.
    async fn remove_buttons(
        &self,
        _channel: &Channel,
        _credentials: &Credentials,
        _message_id: &str,
        _new_text: Option<&str>,
    ) -> Result<()> {
        Err(self.unsupported("button removal"))
    }

    async fn test_connection(&self, channel: &Channel, credentials: &Credentials)
        -> (bool, String);

    fn unsupported(&self, what: &str) -> VigilError {
        VigilError::Provider {
            provider: self.name().to_string(),
            detail: format!("{what} not supported"),
        }
    }
}
