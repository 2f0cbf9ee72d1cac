//! Data model shared by the store, cache, watcher and RPC handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat (conversation), as listed by `chats.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub identifier: String,
    pub guid: Option<String>,
    pub display_name: Option<String>,
    pub service: String,
    pub last_message_at: DateTime<Utc>,
    pub participants: Vec<String>,
    pub is_group: bool,
}

/// The subset of chat metadata the chat cache memoises.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub identifier: String,
    pub guid: Option<String>,
    pub display_name: Option<String>,
    pub service: String,
    pub participants: Vec<String>,
    pub is_group: bool,
}

/// A single message row, with the body-fallback already applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub guid: String,
    pub reply_to_guid: Option<String>,
    pub sender: String,
    pub is_from_me: bool,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

/// An attachment on a message, with its path resolved against `$HOME`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub transfer_name: String,
    pub uti: String,
    pub mime_type: String,
    pub total_bytes: i64,
    pub is_sticker: bool,
    pub path: String,
    pub missing: bool,
}

/// A tapback reaction attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: i64,
    pub kind: ReactionKind,
    pub emoji: String,
    pub sender: String,
    pub is_from_me: bool,
    pub created_at: DateTime<Utc>,
}

/// The tapback kind, or a free-form custom emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Love,
    Like,
    Dislike,
    Laugh,
    Emphasis,
    Question,
    Custom,
}

impl ReactionKind {
    /// Parse a tapback kind from a client-supplied `reaction` string
    /// (§4.9 `reactions.send`). Anything unrecognised is treated as a
    /// custom emoji reaction rather than an error.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "love" | "heart" => Self::Love,
            "like" | "thumbs_up" | "+1" => Self::Like,
            "dislike" | "thumbs_down" | "-1" => Self::Dislike,
            "laugh" | "haha" => Self::Laugh,
            "emphasis" | "emphasize" | "!!" => Self::Emphasis,
            "question" | "?" => Self::Question,
            _ => Self::Custom,
        }
    }

    /// Map the database's `associated_message_type` tapback code to a kind.
    /// Codes outside the known tapback range decode as `Custom`.
    pub fn from_associated_message_type(code: i64) -> Option<Self> {
        match code {
            2000 => Some(Self::Love),
            2001 => Some(Self::Like),
            2002 => Some(Self::Dislike),
            2003 => Some(Self::Laugh),
            2004 => Some(Self::Emphasis),
            2005 => Some(Self::Question),
            2006..=2999 => Some(Self::Custom),
            _ => None,
        }
    }
}
