//! Telegram integration: traits, wire types, client, and update ingestion

pub mod client;
pub mod poller;
pub mod types;
pub mod webhook;

pub use client::TelegramClient;
pub use poller::{PollSettings, Poller};
pub use types::{Chat, Contact, KeyboardButton, Message, ReplyKeyboardMarkup, Update, User};

use async_trait::async_trait;

use crate::error::BrokerError;

/// Plain-text message delivery
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), BrokerError>;
}

/// Delivery with a reply keyboard attached. Split from [`Sender`] so
/// components that only deliver text (the OTP path) cannot reach for markup.
#[async_trait]
pub trait MarkupSender: Sender {
    async fn send_message_with_markup(
        &self,
        chat_id: i64,
        text: &str,
        markup: &ReplyKeyboardMarkup,
    ) -> Result<(), BrokerError>;
}

/// Update retrieval for the long-poll loop
#[async_trait]
pub trait UpdatesClient: Send + Sync {
    async fn get_updates(
        &self,
        offset: i64,
        timeout: std::time::Duration,
        limit: u32,
    ) -> Result<Vec<Update>, BrokerError>;

    /// Remove a webhook registration so long polling can take over
    async fn delete_webhook(&self, drop_pending: bool) -> Result<(), BrokerError>;
}
