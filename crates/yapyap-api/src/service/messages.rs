use tracing::warn;
use uuid::Uuid;

use yapyap_db::Database;
use yapyap_db::models::{ChatRow, NewMessage};
use yapyap_types::api::Page;
use yapyap_types::models::{ChatKind, Media, Message, MessageType};

use super::{Paging, views};
use crate::error::ApiError;

/// A page of a chat's messages, for members only. An unknown chat yields an
/// empty page.
pub fn list(db: &Database, reader: Uuid, chat_id: Uuid, paging: Paging) -> Result<Page<Message>, ApiError> {
    let empty = Page {
        data: vec![],
        page: paging.page,
        limit: paging.limit,
    };
    let Some(chat) = db.get_chat(&chat_id.to_string())? else {
        return Ok(empty);
    };
    if !chat.has_member(&reader.to_string()) {
        return Err(ApiError::forbidden("You are not a member of this chat"));
    }

    let rows = db.list_messages(&chat.id, paging.offset(), paging.limit, paging.ascending)?;
    Ok(Page {
        data: views::messages_in_chat(db, &chat, rows)?,
        ..empty
    })
}

/// What a sender submitted, before any attachment has been uploaded.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    pub chat_id: Option<Uuid>,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub receiver: Option<Uuid>,
    pub message_type: Option<MessageType>,
    pub has_attachment: bool,
}

/// A validated message waiting for its attachment, if any.
pub struct Draft {
    chat: ChatRow,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: Option<String>,
    message_type: MessageType,
}

impl Draft {
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }
}

/// Validate a send and resolve its receiver. Runs before any upload so a
/// rejected message never reaches the media provider.
pub fn prepare(db: &Database, out: Outgoing) -> Result<Draft, ApiError> {
    let chat_id = out
        .chat_id
        .ok_or_else(|| ApiError::bad_request("chatId is required"))?;

    let message_type = if out.has_attachment {
        MessageType::Media
    } else {
        out.message_type.unwrap_or_default()
    };
    let content = out.content.filter(|c| !c.trim().is_empty());
    match message_type {
        MessageType::Text if content.is_none() => {
            return Err(ApiError::bad_request("content is required for text messages"));
        }
        MessageType::Media if !out.has_attachment => {
            return Err(ApiError::bad_request("a media message needs an attached file"));
        }
        _ => {}
    }

    let chat = db
        .get_chat(&chat_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;
    let sender = out.sender_id.to_string();
    if !chat.has_member(&sender) {
        return Err(ApiError::forbidden("You are not a member of this chat"));
    }

    let receiver_id = match (out.receiver, &chat.kind) {
        (Some(explicit), _) => explicit,
        (None, ChatKind::OneToOne) => chat
            .members
            .iter()
            .find(|m| **m != sender)
            .map(|m| views::parse_id(m))
            .unwrap_or(out.sender_id),
        (None, ChatKind::Group { .. }) => out.sender_id,
    };

    Ok(Draft {
        chat,
        sender_id: out.sender_id,
        receiver_id,
        content,
        message_type,
    })
}

/// Persist a prepared message with the sender as its first reader, then move
/// the chat's latest-message pointer. The pointer update is best-effort.
pub fn commit(db: &Database, draft: Draft, media: Option<Media>) -> Result<Message, ApiError> {
    let id = Uuid::new_v4().to_string();
    let sender_id = draft.sender_id.to_string();
    let receiver_id = draft.receiver_id.to_string();

    db.insert_message(&NewMessage {
        id: &id,
        chat_id: &draft.chat.id,
        sender_id: &sender_id,
        receiver_id: &receiver_id,
        content: draft.content.as_deref(),
        message_type: draft.message_type,
        media_url: media.as_ref().map(|m| m.url.as_str()),
        media_public_id: media.as_ref().map(|m| m.public_id.as_str()),
        media_format: media.as_ref().and_then(|m| m.format.as_deref()),
        media_size: media.as_ref().and_then(|m| m.size),
    })?;

    if let Err(e) = db.set_latest_message(&draft.chat.id, &id) {
        warn!("Failed to update latest message of chat {}: {:#}", draft.chat.id, e);
    }

    let row = db
        .get_message(&id)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    views::single_message(db, &draft.chat, row)
}

/// Validate and persist in one step, for callers that already hold any
/// uploaded media.
pub fn send(db: &Database, mut out: Outgoing, media: Option<Media>) -> Result<Message, ApiError> {
    out.has_attachment = media.is_some();
    let draft = prepare(db, out)?;
    commit(db, draft, media)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub chat_id: Uuid,
    pub message_id: Option<Uuid>,
    /// Receipts actually added; zero when everything was already read.
    pub added: usize,
}

/// Add `reader` to the read-set of one message (when `message_id` is given)
/// or of every message in the chat. Repeating it changes nothing. Returns
/// `None` when the target does not exist.
pub fn mark_read(
    db: &Database,
    reader: Uuid,
    chat_id: Option<Uuid>,
    message_id: Option<Uuid>,
) -> Result<Option<ReadReceipt>, ApiError> {
    let reader_id = reader.to_string();

    let chat_id = match (message_id, chat_id) {
        (Some(message_id), _) => match db.get_message(&message_id.to_string())? {
            Some(msg) => views::parse_id(&msg.chat_id),
            None => return Ok(None),
        },
        (None, Some(chat_id)) => chat_id,
        (None, None) => return Err(ApiError::bad_request("chatId or messageId is required")),
    };

    let Some(chat) = db.get_chat(&chat_id.to_string())? else {
        return Ok(None);
    };
    if !chat.has_member(&reader_id) {
        return Err(ApiError::forbidden("You are not a member of this chat"));
    }

    let added = match message_id {
        Some(message_id) => db.mark_message_read(&message_id.to_string(), &reader_id)?,
        None => db.mark_chat_read(&chat.id, &reader_id)?,
    };

    Ok(Some(ReadReceipt {
        chat_id,
        message_id,
        added,
    }))
}

/// Delete a message on behalf of its sender. Returns the chat it was in.
pub fn delete_one(db: &Database, requester: Uuid, message_id: Uuid) -> Result<Uuid, ApiError> {
    let msg = db
        .get_message(&message_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    if msg.sender_id != requester.to_string() {
        return Err(ApiError::forbidden("You can only delete your own messages"));
    }

    db.delete_message(&msg.id)?;
    Ok(views::parse_id(&msg.chat_id))
}

/// Remove every message of a chat. Returns how many were deleted.
pub fn delete_all_for_chat(db: &Database, chat_id: Uuid) -> Result<usize, ApiError> {
    Ok(db.delete_messages_for_chat(&chat_id.to_string())?)
}

/// `delete_all_for_chat` on behalf of a user, who must belong to the chat
/// if it still exists.
pub fn clear_chat(db: &Database, requester: Uuid, chat_id: Uuid) -> Result<usize, ApiError> {
    if let Some(chat) = db.get_chat(&chat_id.to_string())? {
        if !chat.has_member(&requester.to_string()) {
            return Err(ApiError::forbidden("You are not a member of this chat"));
        }
    }
    delete_all_for_chat(db, chat_id)
}
