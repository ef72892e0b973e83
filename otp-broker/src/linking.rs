//! Link-token issuance and phone-to-chat verification

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::crypto::{generate_token, hash_token};
use crate::error::BrokerError;
use crate::ratelimit::RateLimiter;
use crate::store::{LinkStore, LinkToken, TelegramLink, TokenStore};

/// Injectable time source (tests pin it)
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn system_clock() -> Clock {
    Box::new(Utc::now)
}

/// Issues broker-generated link tokens.
///
/// The plaintext token is returned to the caller exactly once; only its
/// HMAC is stored.
pub struct LinkTokenIssuer<S: TokenStore> {
    store: Arc<S>,
    limiter: Option<Arc<dyn RateLimiter>>,
    ttl: Duration,
    hash_secret: Vec<u8>,
    clock: Clock,
}

impl<S: TokenStore> LinkTokenIssuer<S> {
    pub fn new(
        store: Arc<S>,
        limiter: Option<Arc<dyn RateLimiter>>,
        ttl: Duration,
        hash_secret: Vec<u8>,
    ) -> Self {
        Self {
            store,
            limiter,
            ttl,
            hash_secret,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Generate, store, and return a fresh token for the subject
    pub fn issue(
        &self,
        subject_id: &str,
        phone: &str,
    ) -> Result<(String, DateTime<Utc>), BrokerError> {
        if let Some(limiter) = &self.limiter {
            if !limiter.allow(subject_id) {
                return Err(BrokerError::RateLimited);
            }
        }
        if subject_id.is_empty() || phone.is_empty() {
            return Err(BrokerError::Validation(
                "subject and phone are required".into(),
            ));
        }
        if self.hash_secret.is_empty() {
            return Err(BrokerError::Internal("hash secret not configured".into()));
        }

        let token = generate_token();
        let expires_at = (self.clock)() + self.ttl;
        self.store.save_token(LinkToken {
            token_hash: hash_token(&token, &self.hash_secret),
            subject_id: subject_id.to_string(),
            phone: phone.to_string(),
            expires_at,
            consumed_at: None,
        })?;

        Ok((token, expires_at))
    }
}

/// Registers caller-supplied link tokens (the backend mints the token and
/// embeds it in its own deep link).
pub struct LinkTokenRegistrar<S: TokenStore> {
    store: Arc<S>,
    ttl: Duration,
    hash_secret: Vec<u8>,
    clock: Clock,
}

impl<S: TokenStore> LinkTokenRegistrar<S> {
    pub fn new(store: Arc<S>, ttl: Duration, hash_secret: Vec<u8>) -> Self {
        Self {
            store,
            ttl,
            hash_secret,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Store a hash of the supplied token; the subject defaults to the phone
    pub fn register(&self, token: &str, phone: &str) -> Result<DateTime<Utc>, BrokerError> {
        if token.is_empty() || phone.is_empty() {
            return Err(BrokerError::Validation(
                "token and phone are required".into(),
            ));
        }
        if self.hash_secret.is_empty() {
            return Err(BrokerError::Internal("hash secret not configured".into()));
        }

        let expires_at = (self.clock)() + self.ttl;
        self.store.save_token(LinkToken {
            token_hash: hash_token(token, &self.hash_secret),
            subject_id: phone.to_string(),
            phone: phone.to_string(),
            expires_at,
            consumed_at: None,
        })?;

        Ok(expires_at)
    }
}

/// Verifies a presented token and records the phone-to-chat link
pub trait VerifyLink: Send + Sync {
    /// On success returns the phone the token was issued for
    fn verify_and_link(&self, token: &str, chat_id: i64) -> Result<String, BrokerError>;
}

pub struct TelegramLinker<S: TokenStore + LinkStore> {
    store: Arc<S>,
    hash_secret: Vec<u8>,
    max_skew: Duration,
    clock: Clock,
}

impl<S: TokenStore + LinkStore> TelegramLinker<S> {
    pub fn new(store: Arc<S>, hash_secret: Vec<u8>) -> Self {
        Self {
            store,
            hash_secret,
            max_skew: Duration::zero(),
            clock: system_clock(),
        }
    }

    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl<S: TokenStore + LinkStore> VerifyLink for TelegramLinker<S> {
    fn verify_and_link(&self, token: &str, chat_id: i64) -> Result<String, BrokerError> {
        if token.is_empty() {
            return Err(BrokerError::InvalidToken);
        }

        // The store consumes atomically; not-found, already-consumed, and
        // expired are indistinguishable to the caller.
        let hash = hash_token(token, &self.hash_secret);
        let record = self.store.consume_token(&hash)?;

        let now = (self.clock)();
        if now > record.expires_at + self.max_skew {
            return Err(BrokerError::InvalidToken);
        }

        self.store.link_chat(TelegramLink {
            subject_id: record.subject_id,
            phone: record.phone.clone(),
            chat_id,
            verified_at: now,
        })?;

        tracing::info!(phone = %record.phone, chat_id, "Linked phone to chat");
        Ok(record.phone)
    }
}
