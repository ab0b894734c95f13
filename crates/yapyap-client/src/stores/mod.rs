//! State containers a UI renders from. Each store owns its state and is
//! handed the REST client and a notifier when it is built. A store changes
//! only after the server has confirmed the operation.

mod chats;
mod messages;
mod user;

use std::sync::Arc;

use yapyap_types::events::GatewayEvent;

use crate::api::ChatApi;
use crate::error::Result;
use crate::notify::Notifier;
use crate::realtime::RoomSubscriber;

pub use chats::{ChatStore, display_name};
pub use messages::{ChatMessages, MessageStore};
pub use user::UserStore;

/// Pass a failure on to the notifier and return it unchanged.
fn report<T>(notifier: &dyn Notifier, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        notifier.error(&e.to_string());
    }
    result
}

/// All stores of one running application.
pub struct AppStores {
    pub user: UserStore,
    pub chats: ChatStore,
    pub messages: MessageStore,
}

impl AppStores {
    pub fn new(
        api: Arc<dyn ChatApi>,
        notifier: Arc<dyn Notifier>,
        rooms: Arc<dyn RoomSubscriber>,
    ) -> Self {
        Self {
            user: UserStore::new(api.clone(), notifier.clone()),
            chats: ChatStore::new(api.clone(), notifier.clone(), rooms),
            messages: MessageStore::new(api, notifier),
        }
    }

    /// Route a pushed gateway event to the stores it concerns.
    pub fn apply_event(&mut self, event: &GatewayEvent) {
        let me = self.user.user().map(|u| u.id);
        self.chats.apply_event(event, me);
        self.messages.apply_event(event);
    }

    /// End the session and forget everything loaded under it.
    pub async fn log_out(&mut self) -> Result<()> {
        self.user.log_out().await?;
        self.chats.clear();
        self.messages.clear_all();
        Ok(())
    }

    /// Delete the account and forget everything loaded under it.
    pub async fn confirm_delete_account(&mut self, otp: &str) -> Result<()> {
        self.user.confirm_delete_account(otp).await?;
        self.chats.clear();
        self.messages.clear_all();
        Ok(())
    }
}
