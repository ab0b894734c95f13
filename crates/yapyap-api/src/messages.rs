use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use yapyap_types::api::{Claims, CountBody, MarkReadRequest, MessageBody, Page, PageQuery};
use yapyap_types::events::GatewayEvent;
use yapyap_types::models::Message;

use crate::error::ApiError;
use crate::extract::{ApiJson, SendMessageForm};
use crate::service::Paging;
use crate::service::messages::{self as service, Outgoing};
use crate::state::AppState;
use crate::tasks::blocking;

const MEDIA_FOLDER: &str = "yapyap/messages";

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Message>>, ApiError> {
    let paging = Paging::from_query(&query);
    let page = blocking(&state.db, move |db| service::list(db, claims.sub, chat_id, paging)).await?;
    Ok(Json(page))
}

/// Validate first, upload the attachment (if any), then persist and push the
/// message to everyone else in the room.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    form: SendMessageForm,
) -> Result<impl IntoResponse, ApiError> {
    let outgoing = Outgoing {
        chat_id: form.request.chat_id,
        sender_id: claims.sub,
        content: form.request.content,
        receiver: form.request.receiver,
        message_type: form.request.message_type,
        has_attachment: form.attachment.is_some(),
    };
    let draft = blocking(&state.db, move |db| service::prepare(db, outgoing)).await?;

    let media = match form.attachment {
        Some(upload) => Some(state.media.upload(upload, MEDIA_FOLDER).await?),
        None => None,
    };

    let message = blocking(&state.db, move |db| service::commit(db, draft, media)).await?;

    let delivered = state
        .dispatcher
        .publish(
            message.chat.id,
            GatewayEvent::MessageReceived {
                message: message.clone(),
            },
            Some(claims.sub),
        )
        .await;
    debug!("Message {} pushed to {} connections", message.id, delivered);

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> Result<Json<CountBody>, ApiError> {
    let reader_id = claims.sub;
    let receipt = blocking(&state.db, move |db| {
        service::mark_read(db, reader_id, req.chat_id, req.message_id)
    })
    .await?;

    let count = match receipt {
        Some(receipt) if receipt.added > 0 => {
            state
                .dispatcher
                .publish(
                    receipt.chat_id,
                    GatewayEvent::MessagesRead {
                        chat_id: receipt.chat_id,
                        message_id: receipt.message_id,
                        reader_id,
                    },
                    Some(reader_id),
                )
                .await;
            receipt.added
        }
        _ => 0,
    };

    Ok(Json(CountBody {
        message: "Marked as read".into(),
        count,
    }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageBody>, ApiError> {
    let requester = claims.sub;
    let chat_id = blocking(&state.db, move |db| service::delete_one(db, requester, message_id)).await?;

    state
        .dispatcher
        .publish(
            chat_id,
            GatewayEvent::MessageDeleted { chat_id, message_id },
            Some(requester),
        )
        .await;

    Ok(Json(MessageBody::new("Message deleted")))
}

pub async fn delete_chat_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<CountBody>, ApiError> {
    let requester = claims.sub;
    let count = blocking(&state.db, move |db| service::clear_chat(db, requester, chat_id)).await?;
    Ok(Json(CountBody {
        message: "Messages deleted".into(),
        count,
    }))
}
