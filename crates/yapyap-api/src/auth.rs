use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use yapyap_types::api::{
    AuthResponse, Claims, LoginRequest, MessageBody, RequestResetRequest, ResendOtpRequest,
    ResetPasswordRequest, SignupRequest, SignupResponse, VerifyUserRequest,
};
use yapyap_types::models::User;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::mailer::otp_email;
use crate::service::auth::{self as service, IssuedOtp, LoginOutcome};
use crate::service::users;
use crate::state::{AppState, AuthSettings};
use crate::tasks::{blocking, spawn_best_effort};

pub const SESSION_COOKIE: &str = "jwt";

/// The cookie lasts two days regardless of the token lifetime.
const COOKIE_MAX_AGE_DAYS: i64 = 2;

pub fn create_token(settings: &AuthSettings, user: &User) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(settings.token_ttl_secs)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(anyhow::Error::from)?;

    Ok(token)
}

pub fn decode_token(settings: &AuthSettings, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthorized("Invalid or expired session"))
}

pub fn session_cookie(settings: &AuthSettings, token: String) -> Cookie<'static> {
    let same_site = if settings.secure_cookies {
        SameSite::None
    } else {
        SameSite::Lax
    };

    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .path("/")
        .max_age(time::Duration::days(COOKIE_MAX_AGE_DAYS))
        .secure(settings.secure_cookies)
        .same_site(same_site)
        .build()
}

fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: User,
    message: &str,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let token = create_token(&state.auth, &user)?;
    let jar = jar.add(session_cookie(&state.auth, token.clone()));
    Ok((
        jar,
        Json(AuthResponse {
            message: message.to_string(),
            user,
            token,
        }),
    ))
}

pub(crate) fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Mail a one-time code in the background.
pub(crate) fn mail_otp(state: &AppState, otp: IssuedOtp) {
    let mailer = state.mailer.clone();
    spawn_best_effort("otp email", async move {
        mailer.send(otp_email(&otp.email, &otp.code)).await
    });
}

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, otp) = blocking(&state.db, move |db| service::signup(db, &req)).await?;
    mail_otp(&state, otp);

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "Signup successful. Check your email for the verification code".into(),
            user_id: user.id,
            email: user.email,
        }),
    ))
}

pub async fn verify_user(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<VerifyUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state.db, move |db| service::verify(db, req.user_id, &req.otp)).await?;
    start_session(&state, jar, user, "Account verified")
}

pub async fn resend_otp(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResendOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let otp = blocking(&state.db, move |db| service::resend_verification(db, req.user_id)).await?;
    mail_otp(&state, otp);
    Ok(Json(MessageBody::new("A new code has been sent")))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state.db, move |db| {
        service::login(db, &req.identifier, &req.password)
    })
    .await?;

    match outcome {
        LoginOutcome::LoggedIn(user) => start_session(&state, jar, user, "Logged in"),
        LoginOutcome::NeedsVerification { user_id, otp } => {
            mail_otp(&state, otp);
            Err(ApiError::Unverified { user_id })
        }
    }
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (clear_session(jar), Json(MessageBody::new("Logged out")))
}

pub async fn check(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state.db, move |db| users::me(db, claims.sub)).await?;
    Ok(Json(user))
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RequestResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let otp = blocking(&state.db, move |db| service::request_password_reset(db, &req.email)).await?;
    if let Some(otp) = otp {
        mail_otp(&state, otp);
    }
    Ok(Json(MessageBody::new(
        "If that email is registered, a reset code has been sent",
    )))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state.db, move |db| {
        service::reset_password(db, &req.email, &req.otp, &req.password)
    })
    .await?;
    Ok(Json(MessageBody::new("Password updated")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Alice".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            avatar: None,
            is_verified: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn token_round_trip_and_wrong_secret() {
        let settings = AuthSettings::new("s3cret");
        let user = user();
        let token = create_token(&settings, &user).unwrap();

        let claims = decode_token(&settings, &token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");

        assert!(decode_token(&AuthSettings::new("other"), &token).is_err());
    }

    #[test]
    fn cookie_flags_follow_environment() {
        let mut settings = AuthSettings::new("s3cret");
        let dev = session_cookie(&settings, "t".into());
        assert_eq!(dev.name(), SESSION_COOKIE);
        assert_eq!(dev.http_only(), Some(true));
        assert_eq!(dev.same_site(), Some(SameSite::Lax));
        assert_eq!(dev.path(), Some("/"));
        assert_eq!(dev.max_age(), Some(time::Duration::days(2)));

        settings.secure_cookies = true;
        let prod = session_cookie(&settings, "t".into());
        assert_eq!(prod.secure(), Some(true));
        assert_eq!(prod.same_site(), Some(SameSite::None));
    }
}
