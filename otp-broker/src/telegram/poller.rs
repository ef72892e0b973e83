//! Long-poll update ingestion

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::UpdatesClient;
use crate::bot::Bot;

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Server-side long-poll timeout
    pub timeout: Duration,
    /// Sleep after a transport failure before retrying
    pub retry_interval: Duration,
    /// Max updates per poll
    pub limit: u32,
    /// Skip whatever accumulated while the broker was down
    pub drop_pending: bool,
    /// Remove a webhook registration before polling starts
    pub drop_webhook: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            retry_interval: Duration::from_secs(1),
            limit: 50,
            drop_pending: false,
            drop_webhook: false,
        }
    }
}

/// Sequential ingestion loop. One poller per bot token; updates are
/// dispatched in order and a handler failure never stops the loop.
pub struct Poller<C: UpdatesClient> {
    client: Arc<C>,
    bot: Arc<Bot>,
    settings: PollSettings,
}

impl<C: UpdatesClient> Poller<C> {
    pub fn new(client: Arc<C>, bot: Arc<Bot>, settings: PollSettings) -> Self {
        Self {
            client,
            bot,
            settings,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        if self.settings.drop_webhook {
            if let Err(err) = self.client.delete_webhook(self.settings.drop_pending).await {
                tracing::warn!("Failed to delete webhook: {}", err);
            }
        }

        let mut offset: i64 = 0;

        if self.settings.drop_pending {
            match self.client.get_updates(0, Duration::ZERO, self.settings.limit).await {
                Ok(pending) => {
                    if let Some(max_id) = pending.iter().map(|u| u.update_id).max() {
                        offset = max_id + 1;
                        tracing::info!(count = pending.len(), "Dropped pending updates");
                    }
                }
                Err(err) => tracing::warn!("Failed to drain pending updates: {}", err),
            }
        }

        tracing::info!("Polling for updates");

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let updates = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.client.get_updates(offset, self.settings.timeout, self.settings.limit) => {
                    match result {
                        Ok(updates) => updates,
                        Err(err) => {
                            tracing::warn!("Poll failed: {}", err);
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(self.settings.retry_interval) => {}
                            }
                            continue;
                        }
                    }
                }
            };

            for update in &updates {
                if update.update_id >= offset {
                    offset = update.update_id + 1;
                }
                if let Err(err) = self.bot.handle_update(update).await {
                    tracing::error!(update_id = update.update_id, "Update handling failed: {}", err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::BrokerError;
    use crate::linking::VerifyLink;
    use crate::store::InMemoryStore;
    use crate::telegram::types::{Chat, Message, ReplyKeyboardMarkup, Update};
    use crate::telegram::{MarkupSender, Sender};

    struct NullSender;

    #[async_trait]
    impl Sender for NullSender {
        async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl MarkupSender for NullSender {
        async fn send_message_with_markup(
            &self,
            _chat_id: i64,
            _text: &str,
            _markup: &ReplyKeyboardMarkup,
        ) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    struct RecordingVerifier {
        calls: Mutex<Vec<String>>,
    }

    impl VerifyLink for RecordingVerifier {
        fn verify_and_link(&self, token: &str, _chat_id: i64) -> Result<String, BrokerError> {
            self.calls.lock().unwrap().push(token.to_string());
            if token == "boom" {
                Err(BrokerError::Internal("store down".into()))
            } else {
                Ok("+15550001111".into())
            }
        }
    }

    /// Plays back scripted poll results, recording the offsets requested;
    /// cancels the supplied token once the script runs out.
    struct ScriptedClient {
        script: Mutex<Vec<Result<Vec<Update>, BrokerError>>>,
        offsets: Mutex<Vec<i64>>,
        done: CancellationToken,
    }

    #[async_trait]
    impl UpdatesClient for ScriptedClient {
        async fn get_updates(
            &self,
            offset: i64,
            _timeout: Duration,
            _limit: u32,
        ) -> Result<Vec<Update>, BrokerError> {
            self.offsets.lock().unwrap().push(offset);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                self.done.cancel();
                return Ok(Vec::new());
            }
            script.remove(0)
        }

        async fn delete_webhook(&self, _drop_pending: bool) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn start_update(update_id: i64, token: &str) -> Update {
        Update {
            update_id,
            message: Some(Message {
                chat: Chat {
                    id: 101,
                    kind: "private".into(),
                },
                text: format!("/start {}", token),
                ..Default::default()
            }),
        }
    }

    fn harness(
        script: Vec<Result<Vec<Update>, BrokerError>>,
    ) -> (Poller<ScriptedClient>, Arc<ScriptedClient>, Arc<RecordingVerifier>, CancellationToken) {
        let cancel = CancellationToken::new();
        let client = Arc::new(ScriptedClient {
            script: Mutex::new(script),
            offsets: Mutex::new(Vec::new()),
            done: cancel.clone(),
        });
        let verifier = Arc::new(RecordingVerifier {
            calls: Mutex::new(Vec::new()),
        });
        let bot = Arc::new(Bot::new(
            Arc::new(NullSender),
            verifier.clone(),
            Arc::new(InMemoryStore::new()),
        ));
        let settings = PollSettings {
            timeout: Duration::from_millis(1),
            retry_interval: Duration::from_millis(1),
            ..Default::default()
        };
        (Poller::new(client.clone(), bot, settings), client, verifier, cancel)
    }

    #[tokio::test]
    async fn test_offset_advances_past_handled_updates() {
        let (poller, client, verifier, cancel) = harness(vec![Ok(vec![
            start_update(10, "a"),
            start_update(11, "b"),
        ])]);

        poller.run(cancel).await;

        assert_eq!(verifier.calls.lock().unwrap().as_slice(), ["a", "b"]);
        // Second poll asks for updates after the highest seen id
        assert_eq!(client.offsets.lock().unwrap().as_slice(), [0, 12]);
    }

    #[tokio::test]
    async fn test_transport_error_retries() {
        let (poller, client, verifier, cancel) = harness(vec![
            Err(BrokerError::Delivery("connection reset".into())),
            Ok(vec![start_update(5, "a")]),
        ]);

        poller.run(cancel).await;

        assert_eq!(verifier.calls.lock().unwrap().as_slice(), ["a"]);
        assert_eq!(client.offsets.lock().unwrap().as_slice(), [0, 0, 6]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_loop() {
        let (poller, _, verifier, cancel) = harness(vec![Ok(vec![
            start_update(1, "boom"),
            start_update(2, "after"),
        ])]);

        poller.run(cancel).await;

        assert_eq!(verifier.calls.lock().unwrap().as_slice(), ["boom", "after"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_polling() {
        let (poller, client, _, cancel) = harness(vec![Ok(vec![start_update(1, "a")])]);
        cancel.cancel();

        poller.run(cancel).await;

        assert!(client.offsets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_pending_skips_backlog() {
        let cancel = CancellationToken::new();
        let client = Arc::new(ScriptedClient {
            // First call is the drain, second the real poll
            script: Mutex::new(vec![
                Ok(vec![start_update(3, "stale"), start_update(4, "stale")]),
                Ok(vec![start_update(5, "fresh")]),
            ]),
            offsets: Mutex::new(Vec::new()),
            done: cancel.clone(),
        });
        let verifier = Arc::new(RecordingVerifier {
            calls: Mutex::new(Vec::new()),
        });
        let bot = Arc::new(Bot::new(
            Arc::new(NullSender),
            verifier.clone(),
            Arc::new(InMemoryStore::new()),
        ));
        let settings = PollSettings {
            timeout: Duration::from_millis(1),
            retry_interval: Duration::from_millis(1),
            drop_pending: true,
            ..Default::default()
        };
        let poller = Poller::new(client.clone(), bot, settings);

        poller.run(cancel).await;

        assert_eq!(verifier.calls.lock().unwrap().as_slice(), ["fresh"]);
        assert_eq!(client.offsets.lock().unwrap().as_slice(), [0, 5, 6]);
    }

    #[tokio::test]
    async fn test_nonstart_updates_dispatch_without_verifier() {
        let (poller, _, verifier, cancel) = harness(vec![Ok(vec![Update {
            update_id: 1,
            message: Some(Message {
                chat: Chat {
                    id: 101,
                    kind: "private".into(),
                },
                text: "/status".into(),
                ..Default::default()
            }),
        }])]);

        poller.run(cancel).await;
        assert!(verifier.calls.lock().unwrap().is_empty());
    }
}
