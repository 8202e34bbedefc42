//! Interactive-callback poller.
//!
//! One long-lived loop per interactive-capable channel (Telegram is the only
//! callback-capable platform here; webhook providers have no inbound path).
//! Each cycle long-polls `getUpdates`, routes `plan:<action>:<approval_id>`
//! button presses to the approval handler, and advances the update cursor
//! only after a batch is processed. Transport failures back off
//! exponentially up to 60 s; malformed updates are logged, skipped and still
//! advance the cursor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_types::{parse_callback_data, ApprovalAction};

use crate::config::{Channel, ChannelStore};
use crate::credentials::CredentialStore;
use crate::telegram::{TelegramProvider, TelegramUpdate};
use crate::traits::Credentials;

const MAX_BACKOFF_SECS: u64 = 60;

/// Receiver for routed button actions; implemented by the approval service.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn handle_action(
        &self,
        approval_id: &str,
        action: ApprovalAction,
        feedback: Option<String>,
    );
}

pub struct CallbackPoller {
    channels: Arc<ChannelStore>,
    credentials: Arc<dyn CredentialStore>,
    handler: Arc<dyn CallbackHandler>,
    poll_timeout_secs: u64,
}

impl CallbackPoller {
    pub fn new(
        channels: Arc<ChannelStore>,
        credentials: Arc<dyn CredentialStore>,
        handler: Arc<dyn CallbackHandler>,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            channels,
            credentials,
            handler,
            poll_timeout_secs,
        }
    }

    /// Start one polling loop per callback-capable channel. The returned
    /// handles finish once `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for channel in self.channels.find_enabled() {
            if channel.provider != "telegram" {
                continue;
            }
            let poller = self.clone();
            let cancel = cancel.clone();
            info!(channel = %channel.id, "callback poller started");
            handles.push(tokio::spawn(async move {
                poller.poll_channel(channel, cancel).await;
            }));
        }
        handles
    }

    async fn poll_channel(&self, channel: Channel, cancel: CancellationToken) {
        let telegram = TelegramProvider::new();
        let credentials = match self.credentials.resolve(&channel.credential_id) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(channel = %channel.id, "poller cannot resolve credentials: {e}");
                return;
            }
        };

        let mut offset: i64 = 0;
        let mut backoff_secs: u64 = 1;
        // chat_id → approval awaiting free-text feedback after a Discuss
        // press.
        let mut awaiting_feedback: HashMap<String, String> = HashMap::new();

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(channel = %channel.id, "callback poller stopping");
                    return;
                }
                batch = telegram.get_updates(&credentials, offset, self.poll_timeout_secs) => batch,
            };

            let updates = match batch {
                Ok(updates) => {
                    backoff_secs = 1;
                    updates
                }
                Err(e) => {
                    warn!(channel = %channel.id, "poll failed, retrying in {backoff_secs}s: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            };

            for update in updates {
                // Advance past the update whether or not it parses: a bad
                // update must not wedge the loop.
                offset = offset.max(update.update_id() + 1);
                self.process_update(&telegram, &credentials, update, &mut awaiting_feedback)
                    .await;
            }
        }
    }

    async fn process_update(
        &self,
        telegram: &TelegramProvider,
        credentials: &Credentials,
        update: TelegramUpdate,
        awaiting_feedback: &mut HashMap<String, String>,
    ) {
        match update {
            TelegramUpdate::Callback {
                callback_id,
                data,
                chat_id,
                ..
            } => {
                let Some((action, approval_id)) = parse_callback_data(&data) else {
                    warn!(data = %data, "unparseable callback data, skipping update");
                    return;
                };
                if let Err(e) = telegram.answer_callback(credentials, &callback_id, None).await {
                    debug!("answerCallbackQuery failed: {e}");
                }
                match action {
                    ApprovalAction::Discuss => {
                        // A button press carries no free text; remember the
                        // chat and treat its next message as the feedback.
                        awaiting_feedback.insert(chat_id.clone(), approval_id);
                        let _ = telegram
                            .send_to_chat(
                                credentials,
                                &chat_id,
                                "💬 Reply with your feedback for this plan.",
                            )
                            .await;
                    }
                    _ => {
                        self.handler.handle_action(&approval_id, action, None).await;
                    }
                }
            }
            TelegramUpdate::Message { chat_id, text, .. } => {
                if text.trim().is_empty() {
                    return;
                }
                if let Some(approval_id) = awaiting_feedback.remove(&chat_id) {
                    self.handler
                        .handle_action(&approval_id, ApprovalAction::Discuss, Some(text))
                        .await;
                }
            }
            TelegramUpdate::Other { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<(String, ApprovalAction, Option<String>)>>,
    }

    #[async_trait]
    impl CallbackHandler for RecordingHandler {
        async fn handle_action(
            &self,
            approval_id: &str,
            action: ApprovalAction,
            feedback: Option<String>,
        ) {
            self.calls
                .lock()
                .push((approval_id.to_string(), action, feedback));
        }
    }

    fn poller_with(handler: Arc<RecordingHandler>) -> CallbackPoller {
        let tmp = tempfile::TempDir::new().unwrap();
        let channels = Arc::new(ChannelStore::load(tmp.path().join("channels.yaml")).unwrap());
        let credentials = Arc::new(crate::credentials::StaticCredentialStore::new());
        CallbackPoller::new(channels, credentials, handler, 30)
    }

    fn telegram_offline() -> TelegramProvider {
        // Unroutable base so accidental network calls fail immediately.
        TelegramProvider::with_api_base("http://127.0.0.1:1/bot".into())
    }

    #[tokio::test]
    async fn approve_callback_routes_to_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller_with(handler.clone());
        let mut awaiting = HashMap::new();

        poller
            .process_update(
                &telegram_offline(),
                &Credentials::new(),
                TelegramUpdate::Callback {
                    update_id: 7,
                    callback_id: "cb1".into(),
                    data: "plan:approve:a1".into(),
                    chat_id: "42".into(),
                    message_id: "100".into(),
                },
                &mut awaiting,
            )
            .await;

        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "a1");
        assert_eq!(calls[0].1, ApprovalAction::Approve);
        assert!(calls[0].2.is_none());
    }

    #[tokio::test]
    async fn malformed_callback_data_is_dropped() {
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller_with(handler.clone());
        let mut awaiting = HashMap::new();

        poller
            .process_update(
                &telegram_offline(),
                &Credentials::new(),
                TelegramUpdate::Callback {
                    update_id: 8,
                    callback_id: "cb2".into(),
                    data: "garbage".into(),
                    chat_id: "42".into(),
                    message_id: "100".into(),
                },
                &mut awaiting,
            )
            .await;

        assert!(handler.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn discuss_waits_for_the_next_message_as_feedback() {
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller_with(handler.clone());
        let telegram = telegram_offline();
        let mut awaiting = HashMap::new();

        poller
            .process_update(
                &telegram,
                &Credentials::new(),
                TelegramUpdate::Callback {
                    update_id: 9,
                    callback_id: "cb3".into(),
                    data: "plan:discuss:a2".into(),
                    chat_id: "42".into(),
                    message_id: "100".into(),
                },
                &mut awaiting,
            )
            .await;
        // The click alone routes nothing.
        assert!(handler.calls.lock().is_empty());
        assert_eq!(awaiting.get("42").map(String::as_str), Some("a2"));

        // A message from an unrelated chat is ignored.
        poller
            .process_update(
                &telegram,
                &Credentials::new(),
                TelegramUpdate::Message {
                    update_id: 10,
                    chat_id: "77".into(),
                    text: "not feedback".into(),
                },
                &mut awaiting,
            )
            .await;
        assert!(handler.calls.lock().is_empty());

        poller
            .process_update(
                &telegram,
                &Credentials::new(),
                TelegramUpdate::Message {
                    update_id: 11,
                    chat_id: "42".into(),
                    text: "use Python 3.12".into(),
                },
                &mut awaiting,
            )
            .await;

        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, ApprovalAction::Discuss);
        assert_eq!(calls[0].2.as_deref(), Some("use Python 3.12"));
        assert!(awaiting.is_empty());
    }
}
