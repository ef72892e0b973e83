//! Bot API wire types (the subset the broker uses)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// A shared contact. `user_id` is set by Telegram when the contact is a
/// Telegram user; zero means the field was absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    pub request_contact: bool,
}

impl ReplyKeyboardMarkup {
    /// One-button keyboard asking the user to share their phone number
    pub fn contact_request(label: &str) -> Self {
        Self {
            keyboard: vec![vec![KeyboardButton {
                text: label.to_string(),
                request_contact: true,
            }]],
            resize_keyboard: true,
            one_time_keyboard: true,
        }
    }
}
