//! Data models for broker storage

use chrono::{DateTime, Utc};

/// A single-use link token, stored only as its HMAC hash.
///
/// At most one unconsumed, unexpired token exists per phone; saving a new
/// token supersedes the old one. A consumed token is never resurrected.
#[derive(Debug, Clone)]
pub struct LinkToken {
    pub token_hash: Vec<u8>,
    pub subject_id: String,
    pub phone: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// A verified phone-to-chat association.
///
/// Phone and chat id each belong to at most one active link; re-linking
/// replaces any prior record sharing subject, phone, or chat.
#[derive(Debug, Clone)]
pub struct TelegramLink {
    pub subject_id: String,
    pub phone: String,
    pub chat_id: i64,
    pub verified_at: DateTime<Utc>,
}

/// Live OTP state for a subject. One record per subject; replaced on each
/// new request, removed on a successful match or attempt exhaustion.
#[derive(Debug, Clone)]
pub struct OtpState {
    pub subject_id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts_left: i64,
    pub requested_at: DateTime<Utc>,
}
