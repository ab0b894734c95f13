use std::collections::HashMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use yapyap_types::api::{SendMessageRequest, UpdateProfileRequest};

use crate::error::ApiError;
use crate::media::Upload;

/// `Json` whose rejections use the same `{ message }` body as every other
/// error.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

/// A message to send, from either a JSON body or a multipart form whose
/// `media` part is the attachment.
pub struct SendMessageForm {
    pub request: SendMessageRequest,
    pub attachment: Option<Upload>,
}

impl<S> FromRequest<S> for SendMessageForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&req) {
            let ApiJson(request) = ApiJson::<SendMessageRequest>::from_request(req, state).await?;
            return Ok(Self {
                request,
                attachment: None,
            });
        }

        let (fields, mut files) = read_multipart(req, state).await?;
        let request = SendMessageRequest {
            chat_id: uuid_field(&fields, "chatId")?,
            content: fields.get("content").cloned(),
            receiver: uuid_field(&fields, "receiver")?,
            message_type: match fields.get("messageType") {
                Some(raw) => Some(raw.parse().map_err(ApiError::BadRequest)?),
                None => None,
            },
        };
        Ok(Self {
            request,
            attachment: files.remove("media"),
        })
    }
}

/// Profile edits from JSON, or from a multipart form where `avatar` may be
/// an uploaded image instead of a URL.
pub struct ProfileForm {
    pub request: UpdateProfileRequest,
    pub avatar: Option<Upload>,
}

impl<S> FromRequest<S> for ProfileForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&req) {
            let ApiJson(request) = ApiJson::<UpdateProfileRequest>::from_request(req, state).await?;
            return Ok(Self {
                request,
                avatar: None,
            });
        }

        let (mut fields, mut files) = read_multipart(req, state).await?;
        Ok(Self {
            request: UpdateProfileRequest {
                name: fields.remove("name"),
                user_name: fields.remove("userName"),
                avatar: fields.remove("avatar"),
            },
            avatar: files.remove("avatar"),
        })
    }
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

/// Split a multipart body into text fields and file parts. A part counts as
/// a file when it carries a filename. Empty text fields are dropped.
async fn read_multipart<S>(
    req: Request,
    state: &S,
) -> Result<(HashMap<String, String>, HashMap<String, Upload>), ApiError>
where
    S: Send + Sync,
{
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;

    let mut fields = HashMap::new();
    let mut files = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if let Some(filename) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            if !data.is_empty() {
                files.insert(
                    name,
                    Upload {
                        filename,
                        content_type,
                        data,
                    },
                );
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            if !text.is_empty() {
                fields.insert(name, text);
            }
        }
    }

    Ok((fields, files))
}

fn uuid_field(fields: &HashMap<String, String>, name: &str) -> Result<Option<Uuid>, ApiError> {
    fields
        .get(name)
        .map(|raw| {
            raw.parse::<Uuid>()
                .map_err(|_| ApiError::bad_request(format!("{} is not a valid id", name)))
        })
        .transpose()
}
