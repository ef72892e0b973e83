//! reqwest-based Bot API client

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{ReplyKeyboardMarkup, Update};
use super::{MarkupSender, Sender, UpdatesClient};
use crate::error::BrokerError;

const BASE_URL: &str = "https://api.telegram.org";

/// Timeout for non-polling calls
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added on top of the long-poll timeout so the HTTP deadline never
/// fires before the server-side one
const POLL_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// HTTP client for the Telegram Bot API
pub struct TelegramClient {
    http: reqwest::Client,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<T, BrokerError> {
        let url = format!("{}/bot{}/{}", BASE_URL, self.bot_token, method);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BrokerError::Delivery(format!("{}: {}", method, e)))?;

        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| BrokerError::Delivery(format!("{}: {}", method, e)))?;

        if !status.is_success() || !body.ok {
            let description = body.description.unwrap_or_else(|| status.to_string());
            return Err(BrokerError::Delivery(format!("{}: {}", method, description)));
        }

        body.result
            .ok_or_else(|| BrokerError::Delivery(format!("{}: empty result", method)))
    }
}

#[async_trait]
impl Sender for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), BrokerError> {
        let payload = json!({ "chat_id": chat_id, "text": text });
        self.call::<Value>("sendMessage", payload, SEND_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MarkupSender for TelegramClient {
    async fn send_message_with_markup(
        &self,
        chat_id: i64,
        text: &str,
        markup: &ReplyKeyboardMarkup,
    ) -> Result<(), BrokerError> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": markup,
        });
        self.call::<Value>("sendMessage", payload, SEND_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UpdatesClient for TelegramClient {
    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
        limit: u32,
    ) -> Result<Vec<Update>, BrokerError> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "limit": limit,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", payload, timeout + POLL_TIMEOUT_SLACK)
            .await
    }

    async fn delete_webhook(&self, drop_pending: bool) -> Result<(), BrokerError> {
        let payload = json!({ "drop_pending_updates": drop_pending });
        self.call::<bool>("deleteWebhook", payload, SEND_TIMEOUT)
            .await?;
        Ok(())
    }
}
