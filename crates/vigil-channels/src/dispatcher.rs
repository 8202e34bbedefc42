//! Notification dispatcher: fans lifecycle events out to the task's
//! subscribed channels and tracks message ids so start notices can be edited
//! in place on completion.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, warn};

use vigil_types::{ExecutionResult, MessageRef, NotificationEvent, Task};

use crate::config::{Channel, ChannelStore};
use crate::credentials::CredentialStore;
use crate::registry::NotificationRegistry;
use crate::templates;
use crate::traits::{InteractiveMessage, SendOptions};

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    channels: Arc<ChannelStore>,
    credentials: Arc<dyn CredentialStore>,
    registry: Arc<NotificationRegistry>,
    /// (task_id, channel_id) → message_id of an open TASK_START notice.
    open_messages: Mutex<HashMap<(String, String), String>>,
}

impl Dispatcher {
    pub fn new(
        channels: Arc<ChannelStore>,
        credentials: Arc<dyn CredentialStore>,
        registry: Arc<NotificationRegistry>,
    ) -> Self {
        Self {
            channels,
            credentials,
            registry,
            open_messages: Mutex::new(HashMap::new()),
        }
    }

    /// Fan an event out to every subscribed channel. Per-channel failures
    /// are logged and skipped; a task never fails because a notification
    /// did.
    pub async fn notify(
        &self,
        event: NotificationEvent,
        task: &Task,
        result: Option<&ExecutionResult>,
    ) -> Vec<MessageRef> {
        let Some(policy) = &task.notifications else {
            return Vec::new();
        };
        if !policy.subscribes(event) {
            return Vec::new();
        }

        let text = templates::render_event(event, task, result, policy.include_output);
        let completion = matches!(
            event,
            NotificationEvent::TaskComplete
                | NotificationEvent::TaskSuccess
                | NotificationEvent::TaskFailure
        );

        let sends = policy.channels.iter().map(|channel_id| {
            let text = text.clone();
            let task_id = task.id.clone();
            let channel_id = channel_id.clone();
            async move {
                let Some(channel) = self.channels.find_by_id(&channel_id) else {
                    warn!(channel = %channel_id, "notification channel not found");
                    return None;
                };
                if !channel.enabled {
                    debug!(channel = %channel_id, "channel disabled, skipping");
                    return None;
                }
                // Completion events edit the open start notice in place
                // when the provider can edit.
                let mut opts = SendOptions::default();
                if completion {
                    opts.message_id = self
                        .open_messages
                        .lock()
                        .remove(&(task_id.clone(), channel_id.clone()));
                }
                let outcome = self.deliver(&channel, &text, &opts).await?;
                if event == NotificationEvent::TaskStart {
                    if let Some(message_id) = &outcome.0 {
                        self.open_messages
                            .lock()
                            .insert((task_id.clone(), channel_id.clone()), message_id.clone());
                    }
                }
                Some(MessageRef {
                    channel_id,
                    provider: channel.provider.clone(),
                    chat_id: outcome.1.unwrap_or_default(),
                    message_id: outcome.0.unwrap_or_default(),
                })
            }
        });

        join_all(sends).await.into_iter().flatten().collect()
    }

    /// message_id / chat_id on success, `None` after a logged failure.
    async fn deliver(
        &self,
        channel: &Channel,
        text: &str,
        opts: &SendOptions,
    ) -> Option<(Option<String>, Option<String>)> {
        let provider = match self.registry.get(&channel.provider) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(channel = %channel.id, "unknown provider: {e}");
                return None;
            }
        };
        let credentials = match self.credentials.resolve(&channel.credential_id) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(channel = %channel.id, "credential resolution failed: {e}");
                return None;
            }
        };
        let formatted = provider.format_message(text);
        // Fall back to a fresh send when an edit is requested but the
        // provider cannot edit.
        let opts = if opts.message_id.is_some() && !provider.supports_editing() {
            SendOptions::default()
        } else {
            opts.clone()
        };
        match provider.send(channel, &credentials, &formatted, &opts).await {
            Ok(outcome) if outcome.success => Some((outcome.message_id, outcome.chat_id)),
            Ok(_) => {
                warn!(channel = %channel.id, "send reported failure");
                None
            }
            Err(e) => {
                warn!(channel = %channel.id, "send failed: {e}");
                None
            }
        }
    }

    /// Send an interactive message to each listed channel, returning a
    /// message reference per successful delivery.
    pub async fn send_interactive(
        &self,
        channel_ids: &[String],
        message: &InteractiveMessage,
    ) -> Vec<MessageRef> {
        let sends = channel_ids.iter().map(|channel_id| {
            let channel_id = channel_id.clone();
            async move {
                let Some(channel) = self.channels.find_by_id(&channel_id) else {
                    warn!(channel = %channel_id, "interactive channel not found");
                    return None;
                };
                if !channel.enabled {
                    return None;
                }
                let provider = match self.registry.get(&channel.provider) {
                    Ok(provider) => provider,
                    Err(e) => {
                        warn!(channel = %channel_id, "unknown provider: {e}");
                        return None;
                    }
                };
                if !provider.supports_interactive() {
                    warn!(channel = %channel_id, provider = %channel.provider,
                        "provider cannot deliver interactive messages");
                    return None;
                }
                let credentials = match self.credentials.resolve(&channel.credential_id) {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        warn!(channel = %channel_id, "credential resolution failed: {e}");
                        return None;
                    }
                };
                let formatted = InteractiveMessage {
                    text: provider.format_message(&message.text),
                    buttons: message.buttons.clone(),
                };
                match provider.send_interactive(&channel, &credentials, &formatted).await {
                    Ok(outcome) if outcome.success => Some(MessageRef {
                        channel_id,
                        provider: channel.provider.clone(),
                        chat_id: outcome.chat_id.unwrap_or_default(),
                        message_id: outcome.message_id.unwrap_or_default(),
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(channel = %channel_id, "interactive send failed: {e}");
                        None
                    }
                }
            }
        });
        join_all(sends).await.into_iter().flatten().collect()
    }

    /// Remove buttons from every referenced message, replacing the text when
    /// `new_text` is given. Best-effort per message.
    pub async fn retire_messages(&self, refs: &[MessageRef], new_text: Option<&str>) {
        for msg_ref in refs {
            if msg_ref.message_id.is_empty() {
                continue;
            }
            let Some(channel) = self.channels.find_by_id(&msg_ref.channel_id) else {
                continue;
            };
            let Ok(provider) = self.registry.get(&msg_ref.provider) else {
                continue;
            };
            let Ok(credentials) = self.credentials.resolve(&channel.credential_id) else {
                continue;
            };
            let formatted = new_text.map(|t| provider.format_message(t));
            if let Err(e) = provider
                .remove_buttons(&channel, &credentials, &msg_ref.message_id, formatted.as_deref())
                .await
            {
                warn!(message = %msg_ref.message_id, "button removal failed: {e}");
            }
        }
    }

    /// Connectivity probe for one channel.
    pub async fn test_channel(&self, channel_id: &str) -> (bool, String) {
        let Some(channel) = self.channels.find_by_id(channel_id) else {
            return (false, format!("unknown channel '{channel_id}'"));
        };
        let provider = match self.registry.get(&channel.provider) {
            Ok(provider) => provider,
            Err(e) => return (false, e.to_string()),
        };
        let credentials = match self.credentials.resolve(&channel.credential_id) {
            Ok(credentials) => credentials,
            Err(e) => return (false, e.to_string()),
        };
        provider.test_connection(&channel, &credentials).await
    }

    #[cfg(test)]
    fn open_message(&self, task_id: &str, channel_id: &str) -> Option<String> {
        self.open_messages
            .lock()
            .get(&(task_id.to_string(), channel_id.to_string()))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
