use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use yapyap_types::api::{
    AccessChatRequest, Claims, CreateGroupRequest, MemberRequest, MessageBody, Page, PageQuery,
    RemoveMemberResponse, RenameGroupRequest,
};
use yapyap_types::events::GatewayEvent;
use yapyap_types::models::Chat;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::service::Paging;
use crate::service::chats::{self as service, Removal};
use crate::state::AppState;
use crate::tasks::blocking;

async fn announce_update(state: &AppState, chat: &Chat, except: Option<Uuid>) {
    state
        .dispatcher
        .publish(chat.id, GatewayEvent::ChatUpdated { chat: chat.clone() }, except)
        .await;
}

/// Push the result of a membership removal to the chat's room, then take the
/// removed user's connections out of it. The removed user still sees the
/// update that dropped them.
pub(crate) async fn announce_removal(
    state: &AppState,
    removal: Removal,
    removed: Uuid,
    except: Option<Uuid>,
) -> RemoveMemberResponse {
    match removal {
        Removal::Updated(chat) => {
            announce_update(state, &chat, except).await;
            state.dispatcher.evict_user(chat.id, removed).await;
            RemoveMemberResponse::Updated(chat)
        }
        Removal::Deleted(chat_id) => {
            announce_deletion(state, chat_id, except).await;
            RemoveMemberResponse::Deleted {
                message: "Chat deleted".into(),
                chat_id,
            }
        }
    }
}

async fn announce_deletion(state: &AppState, chat_id: Uuid, except: Option<Uuid>) {
    state
        .dispatcher
        .publish(chat_id, GatewayEvent::ChatDeleted { chat_id }, except)
        .await;
    state.dispatcher.close_room(chat_id).await;
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Chat>>, ApiError> {
    let paging = Paging::from_query(&query);
    let page = blocking(&state.db, move |db| service::list(db, claims.sub, paging)).await?;
    Ok(Json(page))
}

pub async fn access_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<AccessChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (chat, created) = blocking(&state.db, move |db| service::access(db, claims.sub, req.user_id)).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(chat)))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = blocking(&state.db, move |db| service::create_group(db, claims.sub, &req)).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<RenameGroupRequest>,
) -> Result<Json<Chat>, ApiError> {
    let me = claims.sub;
    let chat = blocking(&state.db, move |db| service::rename(db, me, &req)).await?;
    announce_update(&state, &chat, Some(me)).await;
    Ok(Json(chat))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MemberRequest>,
) -> Result<Json<Chat>, ApiError> {
    let me = claims.sub;
    let chat = blocking(&state.db, move |db| {
        service::add_member(db, me, req.chat_id, req.user_id)
    })
    .await?;
    announce_update(&state, &chat, Some(me)).await;
    Ok(Json(chat))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<MemberRequest>,
) -> Result<Json<RemoveMemberResponse>, ApiError> {
    let me = claims.sub;
    let removed = req.user_id;
    let removal = blocking(&state.db, move |db| {
        service::remove_member(db, me, req.chat_id, req.user_id)
    })
    .await?;
    Ok(Json(announce_removal(&state, removal, removed, Some(me)).await))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<MessageBody>, ApiError> {
    let me = claims.sub;
    blocking(&state.db, move |db| service::delete(db, me, chat_id)).await?;
    announce_deletion(&state, chat_id, Some(me)).await;
    Ok(Json(MessageBody::new("Chat deleted")))
}
