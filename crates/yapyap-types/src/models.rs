use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as seen by other users. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// What kind of conversation a chat is. Resolved once when a chat row is
/// read from storage; nothing downstream re-derives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatKind {
    OneToOne,
    Group {
        name: String,
        avatar: Option<String>,
        admin: Uuid,
    },
}

impl ChatKind {
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }

    pub fn admin(&self) -> Option<Uuid> {
        match self {
            Self::Group { admin, .. } => Some(*admin),
            Self::OneToOne => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Group { name, .. } => Some(name),
            Self::OneToOne => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: ChatKind,
    pub members: Vec<User>,
    pub latest_message: Option<Box<Message>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|m| m.id == user_id)
    }

    /// For a one-to-one chat, the member that is not `me`.
    pub fn other_member(&self, me: Uuid) -> Option<&User> {
        match self.kind {
            ChatKind::OneToOne => self.members.iter().find(|m| m.id != me),
            ChatKind::Group { .. } => None,
        }
    }
}

/// The chat a message belongs to, embedded in every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: ChatKind,
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Media,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "media" => Ok(Self::Media),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// An uploaded attachment hosted by the media provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub url: String,
    pub public_id: String,
    pub format: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat: ChatSummary,
    pub sender: User,
    pub receiver: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media: Option<Media>,
    /// Users who have read the message, in the order they first read it.
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.contains(&user_id)
    }
}
