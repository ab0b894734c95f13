use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, chats, messages, users};

/// Attachments and avatars travel in request bodies.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Every REST route. The WebSocket endpoint is mounted by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify-user", post(auth::verify_user))
        .route("/api/auth/resend-otp", post(auth::resend_otp))
        .route("/api/auth/password/request-reset", post(auth::request_password_reset))
        .route("/api/auth/password/reset", post(auth::reset_password));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check", get(auth::check))
        // messages
        .route("/api/message", post(messages::send_message))
        .route("/api/message/read", put(messages::mark_read))
        .route("/api/message/chat/{chat_id}", delete(messages::delete_chat_messages))
        // GET takes a chat id, DELETE a message id
        .route(
            "/api/message/{id}",
            get(messages::list_messages).delete(messages::delete_message),
        )
        // chats
        .route("/api/chat", get(chats::list_chats))
        .route("/api/chat/access", post(chats::access_chat))
        .route("/api/chat/group", post(chats::create_group))
        .route("/api/chat/rename", put(chats::rename_group))
        .route("/api/chat/add", put(chats::add_member))
        .route("/api/chat/remove", put(chats::remove_member))
        .route("/api/chat/{chat_id}", delete(chats::delete_chat))
        // users
        .route("/api/user/me", get(users::me))
        .route("/api/user/get/user", get(users::find_user))
        .route("/api/user/update-profile", post(users::update_profile))
        .route("/api/user/email/change/request", post(users::request_email_change))
        .route("/api/user/email/change/confirm", post(users::confirm_email_change))
        .route("/api/user/email/change/resend", post(users::resend_email_change))
        .route("/api/user/delete-account/request", post(users::request_account_deletion))
        .route("/api/user/delete-account/confirm", post(users::confirm_account_deletion))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
