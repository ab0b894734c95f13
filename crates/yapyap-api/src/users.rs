use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;

use yapyap_types::api::{Claims, EmailChangeRequest, FindUserQuery, MessageBody, OtpRequest, PasswordRequest};
use yapyap_types::models::User;

use crate::auth::{clear_session, mail_otp};
use crate::chats::announce_removal;
use crate::error::ApiError;
use crate::extract::{ApiJson, ProfileForm};
use crate::service::users::{self as service, ProfileUpdate};
use crate::state::AppState;
use crate::tasks::blocking;

const AVATAR_FOLDER: &str = "yapyap/avatars";

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state.db, move |db| service::me(db, claims.sub)).await?;
    Ok(Json(user))
}

pub async fn find_user(
    State(state): State<AppState>,
    Query(query): Query<FindUserQuery>,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state.db, move |db| {
        service::find_by_username(db, query.user_name.as_deref())
    })
    .await?;
    Ok(Json(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    form: ProfileForm,
) -> Result<Json<User>, ApiError> {
    let mut update = ProfileUpdate {
        name: form.request.name,
        username: form.request.user_name,
        avatar_url: form.request.avatar,
    };

    if let Some(upload) = form.avatar {
        if !upload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
        {
            return Err(ApiError::bad_request("avatar must be an image"));
        }
        let media = state.media.upload(upload, AVATAR_FOLDER).await?;
        update.avatar_url = Some(media.url);
    }

    let user = blocking(&state.db, move |db| service::update_profile(db, claims.sub, update)).await?;
    Ok(Json(user))
}

pub async fn request_email_change(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<EmailChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let otp = blocking(&state.db, move |db| {
        service::request_email_change(db, claims.sub, &req.email, &req.password)
    })
    .await?;
    mail_otp(&state, otp);
    Ok(Json(MessageBody::new("A code has been sent to your new email")))
}

pub async fn confirm_email_change(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<OtpRequest>,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state.db, move |db| {
        service::confirm_email_change(db, claims.sub, &req.otp)
    })
    .await?;
    Ok(Json(user))
}

pub async fn resend_email_change(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let otp = blocking(&state.db, move |db| service::resend_email_change(db, claims.sub)).await?;
    mail_otp(&state, otp);
    Ok(Json(MessageBody::new("A new code has been sent")))
}

pub async fn request_account_deletion(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<PasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let otp = blocking(&state.db, move |db| {
        service::request_account_deletion(db, claims.sub, &req.password)
    })
    .await?;
    mail_otp(&state, otp);
    Ok(Json(MessageBody::new("A confirmation code has been sent to your email")))
}

pub async fn confirm_account_deletion(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
    ApiJson(req): ApiJson<OtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;
    let changes = blocking(&state.db, move |db| {
        service::confirm_account_deletion(db, me, &req.otp)
    })
    .await?;

    for removal in changes {
        announce_removal(&state, removal, me, None).await;
    }

    Ok((clear_session(jar), Json(MessageBody::new("Account deleted"))))
}
