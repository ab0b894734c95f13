use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use yapyap_types::api::ErrorBody;

/// Every failure a handler can report. Validation problems carry their own
/// message; persistence and provider failures are wrapped in `Server`, logged
/// once here, and reach the caller only as a generic server error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("please verify your account before logging in")]
    Unverified { user_id: Uuid },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("server error: {0:#}")]
    Server(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::Unverified { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = match self {
            Self::Server(e) => {
                error!("request failed: {:#}", e);
                ErrorBody {
                    message: "Server error".into(),
                    needs_verification: None,
                    user_id: None,
                }
            }
            Self::Unverified { user_id } => ErrorBody {
                message,
                needs_verification: Some(true),
                user_id: Some(user_id),
            },
            _ => ErrorBody {
                message,
                needs_verification: None,
                user_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
