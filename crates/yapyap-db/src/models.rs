//! Database row types. These map directly to SQLite rows and stay distinct
//! from the yapyap-types wire models to keep the DB layer independent.
//! The one exception is `ChatKind`: the group/one-to-one distinction is
//! resolved here, once, and carried as a tagged value from then on.

use yapyap_types::models::{ChatKind, MessageType};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

pub struct ChatRow {
    pub id: String,
    pub kind: ChatKind,
    /// Member ids in join order.
    pub members: Vec<String>,
    pub latest_message_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRow {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

/// What happens to one of a deleted account's chats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTeardown {
    /// The chat goes with its messages.
    Delete { chat_id: String },
    /// The user leaves; `new_admin` takes over when the user was admin.
    Leave {
        chat_id: String,
        new_admin: Option<String>,
    },
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_public_id: Option<String>,
    pub media_format: Option<String>,
    pub media_size: Option<i64>,
    /// Readers in the order they first read the message.
    pub read_by: Vec<String>,
    pub created_at: String,
}

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub chat_id: &'a str,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub content: Option<&'a str>,
    pub message_type: MessageType,
    pub media_url: Option<&'a str>,
    pub media_public_id: Option<&'a str>,
    pub media_format: Option<&'a str>,
    pub media_size: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Verify,
    PasswordReset,
    EmailChange,
    DeleteAccount,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
            Self::DeleteAccount => "delete_account",
        }
    }
}

pub struct OtpRow {
    pub user_id: String,
    pub code_hash: String,
    pub payload: Option<String>,
    pub expires_at: String,
}
