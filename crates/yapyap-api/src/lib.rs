pub mod auth;
pub mod chats;
pub mod error;
pub mod extract;
pub mod mailer;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod otp;
pub mod routes;
pub mod service;
pub mod state;
pub mod tasks;
pub mod users;

pub use error::ApiError;
pub use state::{AppState, AppStateInner, AuthSettings};
