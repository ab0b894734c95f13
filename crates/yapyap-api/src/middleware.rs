use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use yapyap_types::api::Claims;

use crate::auth::{SESSION_COOKIE, decode_token};
use crate::error::ApiError;
use crate::state::AppState;
use crate::tasks::blocking;

/// The session token from the `jwt` cookie, or failing that from an
/// `Authorization: Bearer` header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Validate a token and confirm its user still exists and is verified.
/// The returned claims carry the current username.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Claims, ApiError> {
    let mut claims = decode_token(&state.auth, token)?;

    let user_id = claims.sub.to_string();
    let user = blocking(&state.db, move |db| Ok(db.get_user_by_id(&user_id)?)).await?;
    match user {
        Some(user) if user.is_verified => {
            claims.username = user.username;
            Ok(claims)
        }
        Some(_) => Err(ApiError::Unverified { user_id: claims.sub }),
        None => Err(ApiError::unauthorized("Account no longer exists")),
    }
}

/// Require a valid session and expose its `Claims` to the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers())
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    let claims = authenticate(&state, &token).await?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
