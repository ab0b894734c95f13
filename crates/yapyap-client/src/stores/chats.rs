use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use yapyap_types::api::{CreateGroupRequest, MemberRequest, RemoveMemberResponse, RenameGroupRequest};
use yapyap_types::events::GatewayEvent;
use yapyap_types::models::{Chat, ChatKind};

use super::report;
use crate::api::ChatApi;
use crate::error::Result;
use crate::notify::Notifier;
use crate::realtime::RoomSubscriber;

/// The chat list, most recently active first, and the chat on screen.
pub struct ChatStore {
    api: Arc<dyn ChatApi>,
    notifier: Arc<dyn Notifier>,
    rooms: Arc<dyn RoomSubscriber>,
    chats: Vec<Chat>,
    selected: Option<Uuid>,
    page: u32,
    limit: u32,
    has_more: bool,
    loading: bool,
}

impl ChatStore {
    pub fn new(api: Arc<dyn ChatApi>, notifier: Arc<dyn Notifier>, rooms: Arc<dyn RoomSubscriber>) -> Self {
        Self {
            api,
            notifier,
            rooms,
            chats: Vec::new(),
            selected: None,
            page: 0,
            limit: 0,
            has_more: false,
            loading: false,
        }
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, chat_id: Uuid) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    pub fn selected_chat(&self) -> Option<&Chat> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Swap the gateway connection, e.g. after a reconnect. The selected
    /// chat's room is joined again on the new one.
    pub fn set_rooms(&mut self, rooms: Arc<dyn RoomSubscriber>) {
        self.rooms = rooms;
        if let Some(chat_id) = self.selected {
            self.rooms.join_room(chat_id);
        }
    }

    pub async fn fetch(&mut self, page: u32, limit: u32) -> Result<()> {
        self.loading = true;
        let result = self.api.list_chats(page, limit).await;
        self.loading = false;

        let fetched = report(self.notifier.as_ref(), result)?;
        self.has_more = fetched.data.len() == fetched.limit as usize;
        self.page = fetched.page;
        self.limit = fetched.limit;

        if page <= 1 {
            self.chats = fetched.data;
        } else {
            for chat in fetched.data {
                match self.chats.iter_mut().find(|c| c.id == chat.id) {
                    Some(existing) => *existing = chat,
                    None => self.chats.push(chat),
                }
            }
        }
        Ok(())
    }

    /// Open (or create) the one-to-one chat with `user_id` and select it.
    pub async fn access(&mut self, user_id: Uuid) -> Result<Chat> {
        self.loading = true;
        let result = self.api.access_chat(user_id).await;
        self.loading = false;

        let chat = report(self.notifier.as_ref(), result)?;
        self.put_first(chat.clone());
        self.select_chat(Some(chat.id));
        Ok(chat)
    }

    pub async fn create_group(&mut self, req: CreateGroupRequest) -> Result<Chat> {
        self.loading = true;
        let result = self.api.create_group(req).await;
        self.loading = false;

        let chat = report(self.notifier.as_ref(), result)?;
        self.put_first(chat.clone());
        self.notifier.success("Group created");
        Ok(chat)
    }

    pub async fn rename_group(&mut self, req: RenameGroupRequest) -> Result<Chat> {
        self.loading = true;
        let result = self.api.rename_group(req).await;
        self.loading = false;

        let chat = report(self.notifier.as_ref(), result)?;
        self.upsert(chat.clone());
        self.notifier.success("Group updated");
        Ok(chat)
    }

    pub async fn add_to_group(&mut self, chat_id: Uuid, user_id: Uuid) -> Result<Chat> {
        self.loading = true;
        let result = self.api.add_to_group(MemberRequest { chat_id, user_id }).await;
        self.loading = false;

        let chat = report(self.notifier.as_ref(), result)?;
        self.upsert(chat.clone());
        Ok(chat)
    }

    /// Remove a member. When `user_id` is the current user the chat leaves
    /// the list too; pass the current user as `me`.
    pub async fn remove_from_group(&mut self, chat_id: Uuid, user_id: Uuid, me: Uuid) -> Result<RemoveMemberResponse> {
        self.loading = true;
        let result = self.api.remove_from_group(MemberRequest { chat_id, user_id }).await;
        self.loading = false;

        let response = report(self.notifier.as_ref(), result)?;
        match &response {
            RemoveMemberResponse::Updated(chat) if chat.has_member(me) => self.upsert(chat.clone()),
            RemoveMemberResponse::Updated(_) => self.drop_chat(chat_id),
            RemoveMemberResponse::Deleted { message, .. } => {
                self.drop_chat(chat_id);
                self.notifier.success(message);
            }
        }
        Ok(response)
    }

    pub async fn delete_chat(&mut self, chat_id: Uuid) -> Result<()> {
        self.loading = true;
        let result = self.api.delete_chat(chat_id).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.drop_chat(chat_id);
        self.notifier.success(&ack.message);
        Ok(())
    }

    /// Show a chat, or none. The previous chat's room is left and the new
    /// one's joined.
    pub fn select_chat(&mut self, chat_id: Option<Uuid>) {
        if self.selected == chat_id {
            return;
        }
        if let Some(previous) = self.selected.take() {
            self.rooms.leave_room(previous);
        }
        if let Some(next) = chat_id {
            self.rooms.join_room(next);
        }
        self.selected = chat_id;
    }

    /// Select the one-to-one chat between `me` and `user_id`, opening it on
    /// the server only if it is not loaded already.
    pub async fn select_chat_for_user(&mut self, me: Uuid, user_id: Uuid) -> Result<Chat> {
        let existing = self
            .chats
            .iter()
            .find(|c| c.other_member(me).is_some_and(|u| u.id == user_id))
            .cloned();

        match existing {
            Some(chat) => {
                self.select_chat(Some(chat.id));
                Ok(chat)
            }
            None => self.access(user_id).await,
        }
    }

    /// Merge an event pushed by the gateway. `me` is the current user when
    /// known; an update that no longer lists them drops the chat.
    pub fn apply_event(&mut self, event: &GatewayEvent, me: Option<Uuid>) {
        match event {
            GatewayEvent::ChatUpdated { chat } => match me {
                Some(me) if !chat.has_member(me) => self.drop_chat(chat.id),
                _ => self.upsert(chat.clone()),
            },
            GatewayEvent::ChatDeleted { chat_id } => self.drop_chat(*chat_id),
            GatewayEvent::MessageReceived { message } => {
                let Some(index) = self.chats.iter().position(|c| c.id == message.chat.id) else {
                    return;
                };
                let mut chat = self.chats.remove(index);
                chat.latest_message = Some(Box::new(message.clone()));
                chat.updated_at = message.created_at;
                self.chats.insert(0, chat);
            }
            GatewayEvent::MessageDeleted { chat_id, message_id } => {
                if let Some(chat) = self.chats.iter_mut().find(|c| c.id == *chat_id) {
                    if chat.latest_message.as_ref().is_some_and(|m| m.id == *message_id) {
                        chat.latest_message = None;
                    }
                }
            }
            _ => {}
        }
    }

    /// Forget every chat and leave the selected room.
    pub fn clear(&mut self) {
        self.select_chat(None);
        self.chats.clear();
        self.page = 0;
        self.has_more = false;
    }

    fn upsert(&mut self, chat: Chat) {
        match self.chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => self.chats.insert(0, chat),
        }
    }

    fn put_first(&mut self, chat: Chat) {
        self.chats.retain(|c| c.id != chat.id);
        self.chats.insert(0, chat);
    }

    fn drop_chat(&mut self, chat_id: Uuid) {
        debug!("dropping chat {}", chat_id);
        if self.selected == Some(chat_id) {
            self.select_chat(None);
        }
        self.chats.retain(|c| c.id != chat_id);
    }
}

/// Title shown for a chat: the group name, or the other member's name.
pub fn display_name(chat: &Chat, me: Uuid) -> &str {
    match &chat.kind {
        ChatKind::Group { name, .. } => name,
        ChatKind::OneToOne => chat.other_member(me).map_or("Unknown user", |u| u.name.as_str()),
    }
}
