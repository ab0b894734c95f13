//! Turning storage rows into the wire models the API returns. Related rows
//! (members, senders, latest messages) are fetched in batches.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::DateTime;
use tracing::warn;
use uuid::Uuid;

use yapyap_db::models::{ChatRow, MessageRow, UserRow};
use yapyap_db::{Database, parse_timestamp};
use yapyap_types::models::{Chat, ChatSummary, Media, Message, User};

use crate::error::ApiError;

pub fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::nil()
    })
}

pub fn user_view(row: &UserRow) -> User {
    User {
        id: parse_id(&row.id),
        name: row.name.clone(),
        username: row.username.clone(),
        email: row.email.clone(),
        avatar: row.avatar.clone(),
        is_verified: row.is_verified,
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Stand-in for a user row that no longer exists.
fn unknown_user(id: &str) -> User {
    User {
        id: parse_id(id),
        name: "unknown".into(),
        username: "unknown".into(),
        email: String::new(),
        avatar: None,
        is_verified: false,
        created_at: DateTime::default(),
    }
}

pub fn chat_summary(row: &ChatRow) -> ChatSummary {
    ChatSummary {
        id: parse_id(&row.id),
        kind: row.kind.clone(),
        members: row.members.iter().map(|m| parse_id(m)).collect(),
    }
}

fn load_users(db: &Database, ids: &[String]) -> Result<HashMap<String, User>, ApiError> {
    let mut unique = ids.to_vec();
    unique.sort();
    unique.dedup();
    Ok(db
        .get_users_by_ids(&unique)?
        .iter()
        .map(|row| (row.id.clone(), user_view(row)))
        .collect())
}

fn message_view(row: MessageRow, chat: ChatSummary, users: &HashMap<String, User>) -> Message {
    let sender = users
        .get(&row.sender_id)
        .cloned()
        .unwrap_or_else(|| unknown_user(&row.sender_id));
    let media = match (row.media_url, row.media_public_id) {
        (Some(url), Some(public_id)) => Some(Media {
            url,
            public_id,
            format: row.media_format,
            size: row.media_size,
        }),
        _ => None,
    };

    Message {
        id: parse_id(&row.id),
        chat,
        sender,
        receiver: parse_id(&row.receiver_id),
        content: row.content,
        message_type: row.message_type,
        media,
        read_by: row.read_by.iter().map(|r| parse_id(r)).collect(),
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Messages that all belong to one chat.
pub fn messages_in_chat(
    db: &Database,
    chat: &ChatRow,
    rows: Vec<MessageRow>,
) -> Result<Vec<Message>, ApiError> {
    let sender_ids: Vec<String> = rows.iter().map(|r| r.sender_id.clone()).collect();
    let users = load_users(db, &sender_ids)?;
    let summary = chat_summary(chat);

    Ok(rows
        .into_iter()
        .map(|row| message_view(row, summary.clone(), &users))
        .collect())
}

pub fn single_message(db: &Database, chat: &ChatRow, row: MessageRow) -> Result<Message, ApiError> {
    messages_in_chat(db, chat, vec![row])?
        .pop()
        .ok_or_else(|| ApiError::Server(anyhow!("message view lost its row")))
}

/// Chats with members and latest message expanded. A latest-message pointer
/// that no longer resolves is shown as no latest message.
pub fn chats(db: &Database, rows: Vec<ChatRow>) -> Result<Vec<Chat>, ApiError> {
    let latest_ids: Vec<String> = rows.iter().filter_map(|c| c.latest_message_id.clone()).collect();
    let latest_rows = db.get_messages_by_ids(&latest_ids)?;

    let mut user_ids: Vec<String> = rows.iter().flat_map(|c| c.members.iter().cloned()).collect();
    user_ids.extend(latest_rows.iter().map(|m| m.sender_id.clone()));
    let users = load_users(db, &user_ids)?;

    let summaries: HashMap<&str, ChatSummary> =
        rows.iter().map(|c| (c.id.as_str(), chat_summary(c))).collect();
    let mut latest: HashMap<String, Message> = HashMap::new();
    for row in latest_rows {
        let Some(summary) = summaries.get(row.chat_id.as_str()) else {
            continue;
        };
        latest.insert(row.id.clone(), message_view(row, summary.clone(), &users));
    }

    Ok(rows
        .iter()
        .map(|row| Chat {
            id: parse_id(&row.id),
            kind: row.kind.clone(),
            members: row
                .members
                .iter()
                .map(|m| users.get(m).cloned().unwrap_or_else(|| unknown_user(m)))
                .collect(),
            latest_message: row
                .latest_message_id
                .as_ref()
                .and_then(|id| latest.remove(id))
                .map(Box::new),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
        .collect())
}

pub fn chat(db: &Database, row: ChatRow) -> Result<Chat, ApiError> {
    chats(db, vec![row])?
        .pop()
        .ok_or_else(|| ApiError::Server(anyhow!("chat view lost its row")))
}
