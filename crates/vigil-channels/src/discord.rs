//! Discord channel adapter: incoming-webhook POSTs only. No interactive
//! callbacks and no edits; 2000-character message limit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use vigil_types::{Result, VigilError};

use crate::config::Channel;
use crate::format::{strip_html, truncate_with_notice};
use crate::traits::{
    Credentials, FieldSpec, NotificationProvider, ProviderSchema, SendOptions, SendOutcome,
};

const MAX_MESSAGE_LEN: usize = 2000;

pub struct DiscordProvider {
    client: Client,
}

impl DiscordProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn webhook_url<'a>(&self, credentials: &'a Credentials) -> Result<&'a str> {
        credentials
            .get("webhook_url")
            .map(String::as_str)
            .ok_or_else(|| VigilError::Provider {
                provider: "discord".into(),
                detail: "webhook_url credential missing".into(),
            })
    }
}

impl Default for DiscordProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationProvider for DiscordProvider {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn display_name(&self) -> &'static str {
        "Discord"
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            name: "discord",
            display_name: "Discord",
            description: "Send notifications via Discord incoming webhooks",
            required_credentials: vec![FieldSpec {
                name: "webhook_url",
                description: "Webhook URL (channel settings > Integrations > Webhooks)",
                sensitive: true,
                default: None,
            }],
            required_config: vec![],
            optional_config: vec![FieldSpec {
                name: "username",
                description: "Override the webhook display name",
                sensitive: false,
                default: None,
            }],
        }
    }

    fn format_message(&self, text: &str) -> String {
        strip_html(text)
    }

    fn validate_credentials(&self, credentials: &Credentials) -> std::result::Result<(), String> {
        let Some(url) = credentials.get("webhook_url") else {
            return Err("webhook_url is required".into());
        };
        let valid = url.starts_with("https://discord.com/api/webhooks/")
            || url.starts_with("https://discordapp.com/api/webhooks/");
        if valid {
            Ok(())
        } else {
            Err("webhook_url must look like https://discord.com/api/webhooks/...".into())
        }
    }

    async fn send(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        text: &str,
        _opts: &SendOptions,
    ) -> Result<SendOutcome> {
        let url = self.webhook_url(credentials)?;
        let mut body = json!({
            "content": truncate_with_notice(text, MAX_MESSAGE_LEN),
        });
        if let Some(username) = channel.config_str("username") {
            body["username"] = json!(username);
        }

        // `wait=true` makes Discord return the created message object.
        let resp = self
            .client
            .post(format!("{url}?wait=true"))
            .json(&body)
            .send()
            .await
            .map_err(|e| VigilError::Provider {
                provider: "discord".into(),
                detail: format!("webhook request failed: {e}"),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(VigilError::Provider {
                provider: "discord".into(),
                detail: format!("webhook returned {status}: {detail}"),
            });
        }
        let message_id = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(String::from));
        Ok(SendOutcome {
            success: true,
            message_id,
            chat_id: None,
        })
    }

    async fn test_connection(
        &self,
        _channel: &Channel,
        credentials: &Credentials,
    ) -> (bool, String) {
        if let Err(e) = self.validate_credentials(credentials) {
            return (false, e);
        }
        let url = match self.webhook_url(credentials) {
            Ok(url) => url,
            Err(e) => return (false, e.to_string()),
        };
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let name = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("name").and_then(Value::as_str).map(String::from))
                    .unwrap_or_else(|| "webhook".into());
                (true, format!("Connected to {name}"))
            }
            Ok(resp) => (false, format!("Webhook check returned {}", resp.status())),
            Err(e) => (false, format!("Connection failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(url: &str) -> Credentials {
        let mut map = Credentials::new();
        map.insert("webhook_url".into(), url.into());
        map
    }

    #[test]
    fn webhook_url_validation() {
        let provider = DiscordProvider::new();
        assert!(provider
            .validate_credentials(&creds("https://discord.com/api/webhooks/1/abc"))
            .is_ok());
        assert!(provider
            .validate_credentials(&creds("https://example.com/hook"))
            .is_err());
        assert!(provider.validate_credentials(&Credentials::new()).is_err());
    }

    #[test]
    fn no_interactive_support() {
        let provider = DiscordProvider::new();
        assert!(!provider.supports_interactive());
        assert!(!provider.supports_editing());
    }

    #[test]
    fn formats_to_plain_text() {
        let provider = DiscordProvider::new();
        assert_eq!(provider.format_message("<b>done</b>"), "done");
    }
}
