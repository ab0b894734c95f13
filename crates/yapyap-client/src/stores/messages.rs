use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use yapyap_types::api::{MarkReadRequest, SendMessageRequest};
use yapyap_types::events::GatewayEvent;
use yapyap_types::models::Message;

use super::report;
use crate::api::{Attachment, ChatApi};
use crate::error::Result;
use crate::notify::Notifier;

/// The loaded part of one chat's history, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessages {
    pub data: Vec<Message>,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

impl ChatMessages {
    /// Add a message unless one with the same id is already loaded.
    fn insert(&mut self, message: Message) -> bool {
        if self.data.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.data.push(message);
        self.sort();
        true
    }

    fn sort(&mut self) {
        self.data.sort_by_key(|m| m.created_at);
    }

    fn mark_read(&mut self, message_id: Option<Uuid>, reader: Uuid) {
        for msg in self.data.iter_mut() {
            if message_id.is_some_and(|id| id != msg.id) {
                continue;
            }
            if !msg.read_by.contains(&reader) {
                msg.read_by.push(reader);
            }
        }
    }
}

pub struct MessageStore {
    api: Arc<dyn ChatApi>,
    notifier: Arc<dyn Notifier>,
    messages_by_chat: HashMap<Uuid, ChatMessages>,
    loading: bool,
    sending: bool,
    marking_read: bool,
}

impl MessageStore {
    pub fn new(api: Arc<dyn ChatApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            messages_by_chat: HashMap::new(),
            loading: false,
            sending: false,
            marking_read: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn is_marking_read(&self) -> bool {
        self.marking_read
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<&ChatMessages> {
        self.messages_by_chat.get(&chat_id)
    }

    pub fn messages(&self, chat_id: Uuid) -> &[Message] {
        self.chat(chat_id).map(|c| c.data.as_slice()).unwrap_or(&[])
    }

    pub fn has_more(&self, chat_id: Uuid) -> bool {
        self.chat(chat_id).is_some_and(|c| c.has_more)
    }

    /// Load one page of a chat. The first page replaces what was loaded,
    /// later pages are merged in.
    pub async fn fetch(&mut self, chat_id: Uuid, page: u32, limit: u32) -> Result<()> {
        self.loading = true;
        let result = self.api.list_messages(chat_id, page, limit).await;
        self.loading = false;

        let fetched = report(self.notifier.as_ref(), result)?;
        let has_more = fetched.data.len() == fetched.limit as usize;
        debug!("loaded {} messages of chat {} (page {})", fetched.data.len(), chat_id, page);

        let entry = self.messages_by_chat.entry(chat_id).or_default();
        if page <= 1 {
            entry.data = fetched.data;
            entry.sort();
        } else {
            for message in fetched.data {
                entry.insert(message);
            }
        }
        entry.page = fetched.page;
        entry.limit = fetched.limit;
        entry.has_more = has_more;
        Ok(())
    }

    /// Send a message, with an optional file. The confirmed message is added
    /// to its chat if that chat is loaded.
    pub async fn send(&mut self, req: SendMessageRequest, media: Option<Attachment>) -> Result<Message> {
        self.sending = true;
        let result = self.api.send_message(req, media).await;
        self.sending = false;

        let message = report(self.notifier.as_ref(), result)?;
        if let Some(chat) = self.messages_by_chat.get_mut(&message.chat.id) {
            chat.insert(message.clone());
        }
        Ok(message)
    }

    /// Mark one message, or the whole chat when `message_id` is `None`, as
    /// read by `reader`. With `silent` a failure is not reported.
    pub async fn mark_read(
        &mut self,
        chat_id: Uuid,
        message_id: Option<Uuid>,
        reader: Uuid,
        silent: bool,
    ) -> Result<usize> {
        let req = MarkReadRequest {
            chat_id: Some(chat_id),
            message_id,
        };
        self.marking_read = true;
        let result = self.api.mark_read(req).await;
        self.marking_read = false;

        let ack = if silent {
            result?
        } else {
            report(self.notifier.as_ref(), result)?
        };

        if let Some(chat) = self.messages_by_chat.get_mut(&chat_id) {
            chat.mark_read(message_id, reader);
        }
        Ok(ack.count)
    }

    pub async fn delete_message(&mut self, chat_id: Uuid, message_id: Uuid) -> Result<()> {
        self.loading = true;
        let result = self.api.delete_message(message_id).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.remove_message(chat_id, message_id);
        self.notifier.success(&ack.message);
        Ok(())
    }

    /// Delete every message of a chat on the server and locally.
    pub async fn delete_chat(&mut self, chat_id: Uuid) -> Result<usize> {
        self.loading = true;
        let result = self.api.delete_chat_messages(chat_id).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.clear_chat(chat_id);
        self.notifier.success(&ack.message);
        Ok(ack.count)
    }

    /// Forget a chat's loaded messages without touching the server.
    pub fn clear_chat(&mut self, chat_id: Uuid) {
        self.messages_by_chat.remove(&chat_id);
    }

    pub fn clear_all(&mut self) {
        self.messages_by_chat.clear();
    }

    /// Merge an event pushed by the gateway.
    pub fn apply_event(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::MessageReceived { message } => {
                if let Some(chat) = self.messages_by_chat.get_mut(&message.chat.id) {
                    chat.insert(message.clone());
                }
            }
            GatewayEvent::MessagesRead {
                chat_id,
                message_id,
                reader_id,
            } => {
                if let Some(chat) = self.messages_by_chat.get_mut(chat_id) {
                    chat.mark_read(*message_id, *reader_id);
                }
            }
            GatewayEvent::MessageDeleted {
                chat_id,
                message_id,
            } => self.remove_message(*chat_id, *message_id),
            GatewayEvent::ChatDeleted { chat_id } => self.clear_chat(*chat_id),
            _ => {}
        }
    }

    fn remove_message(&mut self, chat_id: Uuid, message_id: Uuid) {
        if let Some(chat) = self.messages_by_chat.get_mut(&chat_id) {
            chat.data.retain(|m| m.id != message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, RecordingNotifier, direct, message, user};
    use yapyap_types::models::{Chat, User};

    struct Fixture {
        api: Arc<FakeApi>,
        notifier: Arc<RecordingNotifier>,
        store: MessageStore,
        me: User,
        bob: User,
        chat: Chat,
    }

    /// Alice and Bob with `count` messages already in their chat.
    fn fixture(count: i64) -> Fixture {
        let me = user("alice");
        let bob = user("bob");
        let chat = direct(&me, &bob);
        let history: Vec<Message> = (0..count)
            .map(|i| message(&chat, &bob, &format!("msg {}", i), i))
            .collect();
        let api = FakeApi::with(|s| {
            s.me = Some(me.clone());
            s.chats = vec![chat.clone()];
            s.messages = history;
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let store = MessageStore::new(api.clone(), notifier.clone());
        Fixture {
            api,
            notifier,
            store,
            me,
            bob,
            chat,
        }
    }

    fn contents(store: &MessageStore, chat_id: Uuid) -> Vec<String> {
        store
            .messages(chat_id)
            .iter()
            .filter_map(|m| m.content.clone())
            .collect()
    }

    #[tokio::test]
    async fn first_page_replaces_later_pages_append() {
        let mut f = fixture(5);

        f.store.fetch(f.chat.id, 1, 2).await.unwrap();
        assert_eq!(contents(&f.store, f.chat.id), vec!["msg 0", "msg 1"]);
        assert!(f.store.has_more(f.chat.id));

        f.store.fetch(f.chat.id, 2, 2).await.unwrap();
        f.store.fetch(f.chat.id, 3, 2).await.unwrap();
        assert_eq!(
            contents(&f.store, f.chat.id),
            vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]
        );
        assert!(!f.store.has_more(f.chat.id));
        assert_eq!(f.store.chat(f.chat.id).unwrap().page, 3);

        f.store.fetch(f.chat.id, 1, 2).await.unwrap();
        assert_eq!(contents(&f.store, f.chat.id), vec!["msg 0", "msg 1"]);
        assert!(!f.store.is_loading());
    }

    #[tokio::test]
    async fn failed_fetch_reports_and_keeps_state() {
        let mut f = fixture(3);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        f.api.fail_next(403, "Not a member of this chat");
        assert!(f.store.fetch(f.chat.id, 1, 50).await.is_err());

        assert!(!f.store.is_loading());
        assert_eq!(f.notifier.errors(), vec!["Not a member of this chat"]);
        assert_eq!(f.store.messages(f.chat.id).len(), 3);
    }

    #[tokio::test]
    async fn sent_message_joins_the_loaded_chat() {
        let mut f = fixture(1);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        let req = SendMessageRequest {
            chat_id: Some(f.chat.id),
            content: Some("hello bob".into()),
            ..Default::default()
        };
        let sent = f.store.send(req, None).await.unwrap();

        assert_eq!(sent.sender.id, f.me.id);
        assert_eq!(contents(&f.store, f.chat.id), vec!["msg 0", "hello bob"]);
        assert!(!f.store.is_sending());
    }

    #[tokio::test]
    async fn failed_send_changes_nothing() {
        let mut f = fixture(1);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        f.api.fail_next(400, "Message content is required");
        let req = SendMessageRequest {
            chat_id: Some(f.chat.id),
            ..Default::default()
        };
        assert!(f.store.send(req, None).await.is_err());

        assert!(!f.store.is_sending());
        assert_eq!(f.store.messages(f.chat.id).len(), 1);
        assert_eq!(f.notifier.errors(), vec!["Message content is required"]);
    }

    #[tokio::test]
    async fn marking_read_twice_keeps_one_receipt() {
        let mut f = fixture(2);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();
        let first = f.store.messages(f.chat.id)[0].id;

        assert_eq!(f.store.mark_read(f.chat.id, Some(first), f.me.id, false).await.unwrap(), 1);
        assert_eq!(f.store.mark_read(f.chat.id, Some(first), f.me.id, false).await.unwrap(), 0);

        let loaded = f.store.messages(f.chat.id);
        assert_eq!(loaded[0].read_by, vec![f.bob.id, f.me.id]);
        assert_eq!(loaded[1].read_by, vec![f.bob.id]);

        f.store.mark_read(f.chat.id, None, f.me.id, false).await.unwrap();
        let loaded = f.store.messages(f.chat.id);
        assert!(loaded.iter().all(|m| m.read_by == vec![f.bob.id, f.me.id]));
    }

    #[tokio::test]
    async fn silent_mark_read_does_not_notify() {
        let mut f = fixture(1);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        f.api.fail_next(500, "Server error");
        assert!(f.store.mark_read(f.chat.id, None, f.me.id, true).await.is_err());
        assert!(f.notifier.errors().is_empty());

        f.api.fail_next(500, "Server error");
        assert!(f.store.mark_read(f.chat.id, None, f.me.id, false).await.is_err());
        assert_eq!(f.notifier.errors(), vec!["Server error"]);
        assert_eq!(f.store.messages(f.chat.id)[0].read_by, vec![f.bob.id]);
    }

    #[tokio::test]
    async fn mark_read_resets_its_flag_either_way() {
        let mut f = fixture(2);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        f.api.fail_next(403, "Not a member of this chat");
        assert!(f.store.mark_read(f.chat.id, None, f.me.id, false).await.is_err());
        assert!(!f.store.is_marking_read());

        f.store.mark_read(f.chat.id, None, f.me.id, false).await.unwrap();
        assert!(!f.store.is_marking_read());
        assert!(f.store.messages(f.chat.id).iter().all(|m| m.read_by.contains(&f.me.id)));
    }

    #[tokio::test]
    async fn deleting_removes_locally_after_confirmation() {
        let mut f = fixture(3);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();
        let middle = f.store.messages(f.chat.id)[1].id;

        f.store.delete_message(f.chat.id, middle).await.unwrap();
        assert_eq!(contents(&f.store, f.chat.id), vec!["msg 0", "msg 2"]);
        assert_eq!(f.notifier.successes(), vec!["Message deleted"]);

        assert_eq!(f.store.delete_chat(f.chat.id).await.unwrap(), 2);
        assert!(f.store.chat(f.chat.id).is_none());
        assert_eq!(f.api.calls("delete_chat_messages"), 1);
    }

    #[tokio::test]
    async fn pushed_events_are_merged_once() {
        let mut f = fixture(1);
        f.store.fetch(f.chat.id, 1, 50).await.unwrap();

        // Arrives out of order: earlier than the loaded message.
        let late = message(&f.chat, &f.bob, "earlier", -1);
        let event = GatewayEvent::MessageReceived {
            message: late.clone(),
        };
        f.store.apply_event(&event);
        f.store.apply_event(&event);
        assert_eq!(contents(&f.store, f.chat.id), vec!["earlier", "msg 0"]);

        f.store.apply_event(&GatewayEvent::MessagesRead {
            chat_id: f.chat.id,
            message_id: None,
            reader_id: f.me.id,
        });
        assert!(f.store.messages(f.chat.id).iter().all(|m| m.is_read_by(f.me.id)));

        f.store.apply_event(&GatewayEvent::MessageDeleted {
            chat_id: f.chat.id,
            message_id: late.id,
        });
        assert_eq!(contents(&f.store, f.chat.id), vec!["msg 0"]);

        f.store.apply_event(&GatewayEvent::ChatDeleted { chat_id: f.chat.id });
        assert!(f.store.chat(f.chat.id).is_none());
    }

    #[tokio::test]
    async fn events_for_unloaded_chats_are_ignored() {
        let mut f = fixture(0);
        let other = direct(&f.me, &user("carol"));

        f.store.apply_event(&GatewayEvent::MessageReceived {
            message: message(&other, &f.bob, "hi", 0),
        });
        assert!(f.store.chat(other.id).is_none());
        f.store.clear_all();
        assert!(f.store.chat(f.chat.id).is_none());
    }
}
