//! One-time passcode issuance and verification

use std::sync::Arc;

use chrono::Duration;

use crate::crypto::generate_otp_code;
use crate::error::BrokerError;
use crate::linking::Clock;
use crate::store::{LinkStore, OtpState, OtpStore, TelegramLink};
use crate::telegram::Sender;

/// Verification attempts granted per issued code
const MAX_ATTEMPTS: i64 = 5;

/// Issues codes to linked chats and verifies them against the store.
pub struct OtpService<S: LinkStore + OtpStore, M: Sender> {
    store: Arc<S>,
    sender: Arc<M>,
    ttl: Duration,
    min_interval: Duration,
    message_prefix: String,
    clock: Clock,
}

impl<S: LinkStore + OtpStore, M: Sender> OtpService<S, M> {
    pub fn new(
        store: Arc<S>,
        sender: Arc<M>,
        ttl: Duration,
        min_interval: Duration,
        message_prefix: String,
    ) -> Self {
        Self {
            store,
            sender,
            ttl,
            min_interval,
            message_prefix,
            clock: Box::new(chrono::Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the link for a phone, then issue
    pub async fn request_by_phone(&self, phone: &str) -> Result<String, BrokerError> {
        let link = self
            .store
            .link_by_phone(phone)?
            .ok_or(BrokerError::NotLinked)?;
        self.request(&link).await?;
        Ok(link.subject_id)
    }

    /// Resolve the link for a chat, then issue
    pub async fn request_by_chat(&self, chat_id: i64) -> Result<String, BrokerError> {
        let link = self
            .store
            .link_by_chat(chat_id)?
            .ok_or(BrokerError::NotLinked)?;
        self.request(&link).await?;
        Ok(link.subject_id)
    }

    /// Generate a fresh code for the subject, store it, and deliver it to
    /// the linked chat.
    pub async fn request(&self, link: &TelegramLink) -> Result<(), BrokerError> {
        let now = (self.clock)();

        // Opportunistic purge keeps the table from accumulating dead codes.
        self.store.delete_expired(now)?;

        if let Some(state) = self.store.otp_state(&link.subject_id)? {
            if now < state.requested_at + self.min_interval {
                return Err(BrokerError::RateLimited);
            }
        }

        let code = generate_otp_code();
        self.store.upsert_code(OtpState {
            subject_id: link.subject_id.clone(),
            code: code.clone(),
            expires_at: now + self.ttl,
            attempts_left: MAX_ATTEMPTS,
            requested_at: now,
        })?;

        let text = format!("{}{}", self.message_prefix, code);
        self.sender.send_message(link.chat_id, &text).await?;

        tracing::debug!(subject = %link.subject_id, chat_id = link.chat_id, "Delivered OTP");
        Ok(())
    }

    /// Check a presented code. The store consumes an attempt on mismatch and
    /// invalidates the record on a match, so success is single-use.
    pub fn verify(&self, subject_id: &str, code: &str) -> Result<(), BrokerError> {
        let now = (self.clock)();
        if self.store.verify_code(subject_id, code, now)? {
            Ok(())
        } else {
            Err(BrokerError::InvalidOtp)
        }
    }

    pub fn resolve_by_phone(&self, phone: &str) -> Result<TelegramLink, BrokerError> {
        self.store.link_by_phone(phone)?.ok_or(BrokerError::NotLinked)
    }

    pub fn resolve_by_chat(&self, chat_id: i64) -> Result<TelegramLink, BrokerError> {
        self.store.link_by_chat(chat_id)?.ok_or(BrokerError::NotLinked)
    }
}
