//! Microsoft Teams channel adapter.
//!
//! Posts Adaptive Card payloads to an incoming-webhook URL (Power Automate
//! Workflows or the legacy O365 connector). Webhooks carry no callbacks, so
//! interactive buttons degrade to `Action.OpenUrl` links pointing at a
//! dashboard. Text is reduced to plain text before it is embedded in the
//! card; the payload is capped at roughly 28 KB.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use vigil_types::{Result, VigilError};

use crate::config::Channel;
use crate::format::{strip_html, truncate_with_notice};
use crate::traits::{
    Credentials, FieldSpec, InteractiveMessage, NotificationProvider, ProviderSchema, SendOptions,
    SendOutcome,
};

const MAX_MESSAGE_LEN: usize = 28_000;

pub struct TeamsProvider {
    client: Client,
}

impl TeamsProvider {
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
                provider: "teams".into(),
                detail: "webhook_url credential missing".into(),
            })
    }

    async fn post_card(&self, credentials: &Credentials, payload: Value) -> Result<()> {
        let url = self.webhook_url(credentials)?;
        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| VigilError::Provider {
                provider: "teams".into(),
                detail: format!("webhook request failed: {e}"),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(VigilError::Provider {
                provider: "teams".into(),
                detail: format!("webhook returned {status}: {detail}"),
            });
        }
        Ok(())
    }

    fn card_payload(&self, channel: &Channel, text: &str, actions: Vec<Value>) -> Value {
        let title = channel
            .config_str("title")
            .unwrap_or_else(|| "Vigil".to_string());
        let mut body = vec![
            json!({
                "type": "TextBlock",
                "text": title,
                "weight": "Bolder",
                "size": "Medium",
                "wrap": true,
            }),
            json!({
                "type": "TextBlock",
                "text": truncate_with_notice(&strip_html(text), MAX_MESSAGE_LEN),
                "wrap": true,
            }),
        ];
        body.retain(|block| !block["text"].as_str().unwrap_or_default().is_empty());

        let mut content = json!({
            "type": "AdaptiveCard",
            "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
            "version": "1.4",
            "body": body,
        });
        if !actions.is_empty() {
            content["actions"] = json!(actions);
        }

        json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "contentUrl": null,
                "content": content,
            }],
        })
    }
}

impl Default for TeamsProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepted webhook shapes: Power Automate Logic Apps, Power Platform
/// workflows, and the retired O365 connector URLs that still work.
fn is_teams_webhook(url: &str) -> bool {
    if !url.starts_with("https://") {
        return false;
    }
    let host = url.trim_start_matches("https://");
    (host.contains(".logic.azure.com") && url.contains("workflows"))
        || (host.contains(".api.powerplatform.com") && url.contains("workflows"))
        || host
            .split_once('/')
            .map(|(h, rest)| h.ends_with(".webhook.office.com") && rest.starts_with("webhookb2/"))
            .unwrap_or(false)
}

#[async_trait]
impl NotificationProvider for TeamsProvider {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn display_name(&self) -> &'static str {
        "Microsoft Teams"
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            name: "teams",
            display_name: "Microsoft Teams",
            description: "Send notifications via Teams incoming webhooks",
            required_credentials: vec![FieldSpec {
                name: "webhook_url",
                description: "Teams workflow webhook URL (Channel > Workflows)",
                sensitive: true,
                default: None,
            }],
            required_config: vec![],
            optional_config: vec![
                FieldSpec {
                    name: "title",
                    description: "Card title",
                    sensitive: false,
                    default: Some("Vigil"),
                },
                FieldSpec {
                    name: "dashboard_url",
                    description: "Base URL the degraded approval buttons link to",
                    sensitive: false,
                    default: None,
                },
            ],
        }
    }

    /// Buttons render, but as links: the webhook transport has no callbacks.
    fn supports_interactive(&self) -> bool {
        true
    }

    fn format_message(&self, text: &str) -> String {
        strip_html(text)
    }

    fn validate_credentials(&self, credentials: &Credentials) -> std::result::Result<(), String> {
        let Some(url) = credentials.get("webhook_url") else {
            return Err("webhook_url is required".into());
        };
        if is_teams_webhook(url) {
            Ok(())
        } else {
            Err("webhook_url is not a recognized Teams webhook \
                 (expected *.logic.azure.com, *.api.powerplatform.com or \
                 *.webhook.office.com/webhookb2/...)"
                .into())
        }
    }

    async fn send(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        text: &str,
        _opts: &SendOptions,
    ) -> Result<SendOutcome> {
        let payload = self.card_payload(channel, text, vec![]);
        self.post_card(credentials, payload).await?;
        // Webhooks return no message id, so later edits are impossible.
        Ok(SendOutcome {
            success: true,
            message_id: None,
            chat_id: None,
        })
    }

    async fn send_interactive(
        &self,
        channel: &Channel,
        credentials: &Credentials,
        message: &InteractiveMessage,
    ) -> Result<SendOutcome> {
        let actions: Vec<Value> = match channel.config_str("dashboard_url") {
            Some(base) => message
                .buttons
                .iter()
                .map(|b| {
                    json!({
                        "type": "Action.OpenUrl",
                        "title": b.label,
                        "url": format!("{}/approvals?callback={}", base.trim_end_matches('/'), b.callback_data),
                    })
                })
                .collect(),
            // Without a dashboard there is nothing useful to link to.
            None => vec![],
        };
        let payload = self.card_payload(channel, &message.text, actions);
        self.post_card(credentials, payload).await?;
        Ok(SendOutcome {
            success: true,
            message_id: None,
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
        // Webhooks have no read endpoint; a no-op card is the only probe.
        let probe = json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "contentUrl": null,
                "content": {
                    "type": "AdaptiveCard",
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "version": "1.4",
                    "body": [{ "type": "TextBlock", "text": "Vigil connection test", "wrap": true }],
                },
            }],
        });
        match self.post_card(credentials, probe).await {
            Ok(()) => (true, "Webhook accepted a test card".into()),
            Err(e) => (false, format!("Connection failed: {e}")),
        }
    }
}
