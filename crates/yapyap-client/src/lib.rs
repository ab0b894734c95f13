//! Client side of yapyap: a REST client, a real-time gateway client and the
//! state stores a UI renders from.

pub mod api;
pub mod error;
pub mod notify;
pub mod realtime;
pub mod stores;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Attachment, ChatApi, HttpApi, LoginResult};
pub use error::{ClientError, Result};
pub use notify::{Notifier, TracingNotifier};
pub use realtime::{RealtimeClient, RoomSubscriber};
pub use stores::AppStores;
