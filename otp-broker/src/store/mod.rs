//! Storage abstractions for the broker

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::BrokerError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, BrokerError>;

/// Trait for link-token storage
pub trait TokenStore: Send + Sync {
    /// Save a token record, superseding any unconsumed token for the same phone
    fn save_token(&self, token: LinkToken) -> StoreResult<()>;

    /// Atomically fetch-and-consume an unconsumed, unexpired token.
    ///
    /// Not-found, already-consumed, and expired all fail uniformly with
    /// [`BrokerError::InvalidToken`]; two concurrent consumers of the same
    /// token must not both succeed.
    fn consume_token(&self, token_hash: &[u8]) -> StoreResult<LinkToken>;
}

/// Trait for phone-to-chat link storage
pub trait LinkStore: Send + Sync {
    /// Get the active link for a phone
    fn link_by_phone(&self, phone: &str) -> StoreResult<Option<TelegramLink>>;

    /// Get the active link for a chat id
    fn link_by_chat(&self, chat_id: i64) -> StoreResult<Option<TelegramLink>>;

    /// Write a link, atomically replacing any prior record sharing the
    /// subject, phone, or chat id
    fn link_chat(&self, link: TelegramLink) -> StoreResult<()>;
}

/// Trait for OTP state storage
pub trait OtpStore: Send + Sync {
    /// Store OTP state for a subject, replacing any prior record
    fn upsert_code(&self, state: OtpState) -> StoreResult<()>;

    /// Atomic check-and-decrement. A mismatch consumes one attempt; a match,
    /// expiry, or attempt exhaustion removes the record in the same
    /// operation, so a matched code can never verify twice.
    fn verify_code(&self, subject_id: &str, code: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Read the live OTP state for a subject, if any
    fn otp_state(&self, subject_id: &str) -> StoreResult<Option<OtpState>>;

    /// Remove OTP records whose expiry is before the given instant
    fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<()>;
}

/// Convenience bound for components that need the whole storage surface
pub trait Store: TokenStore + LinkStore + OtpStore {}

impl<T: TokenStore + LinkStore + OtpStore> Store for T {}
