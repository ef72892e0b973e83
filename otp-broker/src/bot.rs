//! Telegram update router

use std::sync::Arc;

use chrono::Utc;

use crate::error::BrokerError;
use crate::linking::VerifyLink;
use crate::phone;
use crate::store::{LinkStore, TelegramLink};
use crate::telegram::types::{Contact, ReplyKeyboardMarkup, Update};
use crate::telegram::MarkupSender;

/// Deep-link payloads may carry this prefix in front of the token
const VERIFY_PREFIX: &str = "verify_";

const SHARE_PHONE_LABEL: &str = "Share phone number";

const WELCOME_TEXT: &str = "Hi! Share your phone number with the button below, \
or open the verification link you were given.";

const HELP_TEXT: &str = "Share your phone number with the button below to link \
it to this chat. Once linked, login codes arrive here. /status shows the \
current link.";

const NOT_UNDERSTOOD_TEXT: &str =
    "Sorry, I did not understand that. Try /help.";

const INVALID_TOKEN_TEXT: &str = "That verification link is invalid or has \
expired. Request a new one, or share your phone number with the button below.";

const NOT_LINKED_TEXT: &str =
    "No phone number is linked to this chat yet. Share yours with the button below.";

const CONTACT_RETRY_TEXT: &str =
    "That contact had no usable phone number. Please try again.";

const FOREIGN_CONTACT_TEXT: &str =
    "Please share your own contact, not someone else's.";

const PHONE_TAKEN_TEXT: &str = "That phone number is already linked to a \
different chat. Unlink it there first.";

const CHAT_TAKEN_TEXT: &str = "This chat is already linked to a different \
phone number. Use /status to see which.";

/// What an incoming update asks of the bot.
///
/// Parsing is total: every update maps to exactly one variant and the
/// handler matches exhaustively, so new variants cannot be silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Nothing actionable (no message, group chat, channel, empty text)
    Ignore,
    Contact {
        chat_id: i64,
        sender_id: i64,
        contact: Contact,
    },
    Command {
        chat_id: i64,
        name: String,
        arg: Option<String>,
    },
    /// Free text in a private chat
    Text { chat_id: i64 },
}

/// Classify an update. Only positive-id private chats are actionable.
pub fn classify(update: &Update) -> Inbound {
    let Some(message) = &update.message else {
        return Inbound::Ignore;
    };
    let chat_id = message.chat.id;
    // An absent chat type counts as private; groups and channels do not.
    if chat_id <= 0 || !(message.chat.kind.is_empty() || message.chat.kind == "private") {
        return Inbound::Ignore;
    }

    if let Some(contact) = &message.contact {
        let sender_id = message.from.as_ref().map(|u| u.id).unwrap_or(0);
        return Inbound::Contact {
            chat_id,
            sender_id,
            contact: contact.clone(),
        };
    }

    let text = message.text.trim();
    if text.is_empty() {
        return Inbound::Ignore;
    }

    if let Some(rest) = text.strip_prefix('/') {
        let mut fields = rest.split_whitespace();
        let raw_name = fields.next().unwrap_or("");
        // Commands in private chats may still carry an @botname suffix
        let name = raw_name.split('@').next().unwrap_or("").to_string();
        // Only the first argument matters; trailing words are ignored
        let arg = fields.next().map(String::from);
        return Inbound::Command { chat_id, name, arg };
    }

    Inbound::Text { chat_id }
}

/// Stateless per-update dispatcher
pub struct Bot {
    sender: Arc<dyn MarkupSender>,
    verifier: Arc<dyn VerifyLink>,
    links: Arc<dyn LinkStore>,
}

impl Bot {
    pub fn new(
        sender: Arc<dyn MarkupSender>,
        verifier: Arc<dyn VerifyLink>,
        links: Arc<dyn LinkStore>,
    ) -> Self {
        Self {
            sender,
            verifier,
            links,
        }
    }

    pub async fn handle_update(&self, update: &Update) -> Result<(), BrokerError> {
        match classify(update) {
            Inbound::Ignore => Ok(()),
            Inbound::Contact {
                chat_id,
                sender_id,
                contact,
            } => self.handle_contact(chat_id, sender_id, &contact).await,
            Inbound::Command { chat_id, name, arg } => match name.as_str() {
                "start" => self.handle_start(chat_id, arg.as_deref()).await,
                "help" => self.send_with_keyboard(chat_id, HELP_TEXT).await,
                "status" => self.handle_status(chat_id).await,
                _ => self.sender.send_message(chat_id, NOT_UNDERSTOOD_TEXT).await,
            },
            Inbound::Text { chat_id } => {
                self.sender.send_message(chat_id, NOT_UNDERSTOOD_TEXT).await
            }
        }
    }

    async fn send_with_keyboard(&self, chat_id: i64, text: &str) -> Result<(), BrokerError> {
        let markup = ReplyKeyboardMarkup::contact_request(SHARE_PHONE_LABEL);
        self.sender
            .send_message_with_markup(chat_id, text, &markup)
            .await
    }

    async fn handle_start(&self, chat_id: i64, arg: Option<&str>) -> Result<(), BrokerError> {
        let token = arg
            .map(|a| a.strip_prefix(VERIFY_PREFIX).unwrap_or(a))
            .unwrap_or("");

        if token.is_empty() {
            return self.send_with_keyboard(chat_id, WELCOME_TEXT).await;
        }

        match self.verifier.verify_and_link(token, chat_id) {
            Ok(phone) => {
                let text = format!("Done! {} is now linked to this chat.", phone);
                self.sender.send_message(chat_id, &text).await
            }
            Err(BrokerError::InvalidToken) => {
                self.send_with_keyboard(chat_id, INVALID_TOKEN_TEXT).await
            }
            Err(err) => Err(err),
        }
    }

    async fn handle_contact(
        &self,
        chat_id: i64,
        sender_id: i64,
        contact: &Contact,
    ) -> Result<(), BrokerError> {
        // A forwarded contact carries its owner's user id; only the sender's
        // own contact proves possession of the number.
        if contact.user_id != 0 && contact.user_id != sender_id {
            return self.sender.send_message(chat_id, FOREIGN_CONTACT_TEXT).await;
        }

        let Some(phone) = phone::normalize(&contact.phone_number) else {
            return self.send_with_keyboard(chat_id, CONTACT_RETRY_TEXT).await;
        };

        if let Some(existing) = self.links.link_by_phone(&phone)? {
            if existing.chat_id == chat_id {
                let text = format!("{} is already linked to this chat.", phone);
                return self.sender.send_message(chat_id, &text).await;
            }
            return self.sender.send_message(chat_id, PHONE_TAKEN_TEXT).await;
        }

        if self.links.link_by_chat(chat_id)?.is_some() {
            return self.sender.send_message(chat_id, CHAT_TAKEN_TEXT).await;
        }

        self.links.link_chat(TelegramLink {
            subject_id: phone.clone(),
            phone: phone.clone(),
            chat_id,
            verified_at: Utc::now(),
        })?;
        tracing::info!(phone = %phone, chat_id, "Linked phone via shared contact");

        let text = format!("Done! {} is now linked to this chat.", phone);
        self.sender.send_message(chat_id, &text).await
    }

    async fn handle_status(&self, chat_id: i64) -> Result<(), BrokerError> {
        match self.links.link_by_chat(chat_id)? {
            Some(link) => {
                let text = format!("This chat is linked to {}.", link.phone);
                self.sender.send_message(chat_id, &text).await
            }
            None => self.send_with_keyboard(chat_id, NOT_LINKED_TEXT).await,
        }
    }
}
