use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Chat, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid, username: String },

    /// The connection is now subscribed to a chat room
    RoomJoined { chat_id: Uuid },

    /// The connection left a chat room
    RoomLeft { chat_id: Uuid },

    /// A new message was posted in a chat
    MessageReceived { message: Message },

    /// A reader acknowledged one message, or the whole chat when
    /// `message_id` is absent
    MessagesRead {
        chat_id: Uuid,
        message_id: Option<Uuid>,
        reader_id: Uuid,
    },

    /// A message was removed by its sender
    MessageDeleted { chat_id: Uuid, message_id: Uuid },

    /// Membership, name or avatar of a chat changed
    ChatUpdated { chat: Chat },

    /// A chat and all its messages are gone
    ChatDeleted { chat_id: Uuid },

    /// A command from this connection was refused
    Error { message: String },
}

impl GatewayEvent {
    /// The chat room this event belongs to, if any.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::RoomJoined { chat_id }
            | Self::RoomLeft { chat_id }
            | Self::MessagesRead { chat_id, .. }
            | Self::MessageDeleted { chat_id, .. }
            | Self::ChatDeleted { chat_id } => Some(*chat_id),
            Self::MessageReceived { message } => Some(message.chat.id),
            Self::ChatUpdated { chat } => Some(chat.id),
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Start receiving events for a chat (the chat was selected)
    JoinRoom { chat_id: Uuid },

    /// Stop receiving events for a chat (the chat was deselected)
    LeaveRoom { chat_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_wire_format() {
        let chat_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"join_room","data":{{"chatId":"{}"}}}}"#, chat_id);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::JoinRoom { chat_id });
    }

    #[test]
    fn read_event_uses_camel_case_fields() {
        let chat_id = Uuid::new_v4();
        let reader_id = Uuid::new_v4();
        let event = GatewayEvent::MessagesRead {
            chat_id,
            message_id: None,
            reader_id,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messages_read");
        assert_eq!(json["data"]["readerId"], reader_id.to_string());
        assert_eq!(event.chat_id(), Some(chat_id));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let raw = r#"{"type":"voice_join","data":{}}"#;
        assert!(serde_json::from_str::<GatewayCommand>(raw).is_err());
    }
}
