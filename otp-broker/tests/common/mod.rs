//! Common test utilities for broker integration tests

#![allow(dead_code)]

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum_test::TestServer;
use otp_broker::telegram::ReplyKeyboardMarkup;
use otp_broker::{
    routes, ApiLimiters, AppState, BrokerError, Config, InMemoryStore, MarkupSender, Sender,
};
use serde_json::json;

pub const INTERNAL_KEY: &str = "internal-test-key";
pub const WEBHOOK_SECRET: &str = "webhook-test-secret";

/// Mock sender that captures outgoing Telegram messages
#[derive(Default)]
pub struct MockSender {
    /// Captured (chat_id, text) pairs
    pub sent: RwLock<Vec<(i64, String)>>,
}

impl MockSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Last message delivered to a chat
    pub fn last_text(&self, chat_id: i64) -> Option<String> {
        self.sent
            .read()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| *c == chat_id)
            .map(|(_, t)| t.clone())
    }

    /// Last OTP code delivered to a chat
    pub fn last_code(&self, chat_id: i64) -> Option<String> {
        self.last_text(chat_id)?
            .strip_prefix("Login code: ")
            .map(String::from)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), BrokerError> {
        self.sent.write().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl MarkupSender for MockSender {
    async fn send_message_with_markup(
        &self,
        chat_id: i64,
        text: &str,
        _markup: &ReplyKeyboardMarkup,
    ) -> Result<(), BrokerError> {
        self.sent.write().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Config with test secrets and no OTP re-request delay
pub fn base_config() -> Config {
    Config {
        internal_key: INTERNAL_KEY.to_string(),
        hash_secret: "test-hash-secret".to_string(),
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        otp_min_interval: chrono::Duration::zero(),
        rate_limit: 0,
        ..Config::default()
    }
}

/// Create a test server over an in-memory store and a mock sender
pub fn create_test_server(config: Config) -> (TestServer, Arc<InMemoryStore>, Arc<MockSender>) {
    create_test_server_with(config, ApiLimiters::noop())
}

pub fn create_test_server_with(
    config: Config,
    limiters: ApiLimiters,
) -> (TestServer, Arc<InMemoryStore>, Arc<MockSender>) {
    let store = Arc::new(InMemoryStore::new());
    let sender = MockSender::new();

    let state = Arc::new(AppState::new(store.clone(), sender.clone(), &config, limiters));
    let app = routes::create_router(state);
    let server = TestServer::new(app).expect("Failed to create test server");

    (server, store, sender)
}

/// Register a backend-minted link token over the internal API
pub async fn register_token(server: &TestServer, token: &str, phone: &str) {
    let response = server
        .post("/internal/link_token")
        .add_header(
            axum::http::HeaderName::from_static("x-internal-key"),
            axum::http::HeaderValue::from_static(INTERNAL_KEY),
        )
        .json(&json!({ "phone": phone, "token": token }))
        .await;
    assert_eq!(response.status_code(), 200);
}

/// A webhook update carrying a `/start` deep link with the given token
pub fn start_webhook_payload(chat_id: i64, token: &str) -> serde_json::Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "username": "tester"},
            "text": format!("/start verify_{}", token),
        }
    })
}

/// A webhook update carrying a shared contact
pub fn contact_webhook_payload(
    chat_id: i64,
    sender_id: i64,
    phone: &str,
    owner_id: i64,
) -> serde_json::Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": sender_id, "username": "tester"},
            "contact": {"phone_number": phone, "user_id": owner_id},
        }
    })
}
