//! OTP Broker
//!
//! Links phone numbers to Telegram chats via single-use deep-link tokens or
//! shared contacts, then delivers and verifies short-lived one-time
//! passcodes through the linked chat. Driven by a backend over an
//! internally-authenticated HTTP API.

pub mod bot;
pub mod config;
pub mod crypto;
pub mod error;
pub mod linking;
pub mod otp;
pub mod phone;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod store;
pub mod telegram;

pub use bot::{classify, Bot, Inbound};
pub use config::{Config, IngestMode};
pub use error::BrokerError;
pub use linking::{LinkTokenIssuer, LinkTokenRegistrar, TelegramLinker, VerifyLink};
pub use otp::OtpService;
pub use ratelimit::{FixedWindowLimiter, NoopLimiter, RateLimiter};
pub use state::{ApiLimiters, AppState};
pub use store::{InMemoryStore, LinkStore, OtpStore, SqliteStore, Store, TokenStore};
pub use telegram::{
    MarkupSender, PollSettings, Poller, Sender, TelegramClient, UpdatesClient,
};
