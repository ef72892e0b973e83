//! In-memory storage implementation (development and tests)

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{LinkStore, LinkToken, OtpState, OtpStore, StoreResult, TelegramLink, TokenStore};
use crate::error::BrokerError;

/// In-memory store backing all three storage traits.
///
/// Each operation takes the relevant write lock for its whole duration, so
/// the consume / conditional-replace operations are atomic here just as they
/// are in the SQLite implementation.
pub struct InMemoryStore {
    tokens: RwLock<HashMap<Vec<u8>, LinkToken>>,
    links: RwLock<HashMap<String, TelegramLink>>,
    otps: RwLock<HashMap<String, OtpState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            otps: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for InMemoryStore {
    fn save_token(&self, token: LinkToken) -> StoreResult<()> {
        let mut tokens = self.tokens.write().unwrap();
        // One live token per phone: issuing a new one supersedes the old.
        tokens.retain(|_, t| t.phone != token.phone || t.consumed_at.is_some());
        tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    fn consume_token(&self, token_hash: &[u8]) -> StoreResult<LinkToken> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().unwrap();
        let record = tokens.get_mut(token_hash).ok_or(BrokerError::InvalidToken)?;
        if record.consumed_at.is_some() || record.expires_at <= now {
            return Err(BrokerError::InvalidToken);
        }
        record.consumed_at = Some(now);
        Ok(record.clone())
    }
}

impl LinkStore for InMemoryStore {
    fn link_by_phone(&self, phone: &str) -> StoreResult<Option<TelegramLink>> {
        let links = self.links.read().unwrap();
        Ok(links.values().find(|l| l.phone == phone).cloned())
    }

    fn link_by_chat(&self, chat_id: i64) -> StoreResult<Option<TelegramLink>> {
        let links = self.links.read().unwrap();
        Ok(links.values().find(|l| l.chat_id == chat_id).cloned())
    }

    fn link_chat(&self, link: TelegramLink) -> StoreResult<()> {
        let mut links = self.links.write().unwrap();
        links.retain(|_, l| {
            l.subject_id != link.subject_id && l.phone != link.phone && l.chat_id != link.chat_id
        });
        links.insert(link.subject_id.clone(), link);
        Ok(())
    }
}

impl OtpStore for InMemoryStore {
    fn upsert_code(&self, state: OtpState) -> StoreResult<()> {
        let mut otps = self.otps.write().unwrap();
        otps.insert(state.subject_id.clone(), state);
        Ok(())
    }

    fn verify_code(&self, subject_id: &str, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut otps = self.otps.write().unwrap();
        let (remove, matched) = match otps.get_mut(subject_id) {
            None => return Ok(false),
            Some(state) => {
                if state.expires_at <= now || state.attempts_left <= 0 {
                    (true, false)
                } else if state.code == code {
                    (true, true)
                } else {
                    state.attempts_left -= 1;
                    (false, false)
                }
            }
        };
        if remove {
            otps.remove(subject_id);
        }
        Ok(matched)
    }

    fn otp_state(&self, subject_id: &str) -> StoreResult<Option<OtpState>> {
        let otps = self.otps.read().unwrap();
        Ok(otps.get(subject_id).cloned())
    }

    fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<()> {
        let mut otps = self.otps.write().unwrap();
        otps.retain(|_, state| state.expires_at > before);
        Ok(())
    }
}
