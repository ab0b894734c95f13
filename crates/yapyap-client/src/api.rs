use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use yapyap_types::api::{
    AccessChatRequest, AuthResponse, CountBody, CreateGroupRequest, EmailChangeRequest, ErrorBody,
    LoginRequest, MarkReadRequest, MemberRequest, MessageBody, OtpRequest, Page, PasswordRequest,
    RemoveMemberResponse, RenameGroupRequest, RequestResetRequest, ResendOtpRequest,
    ResetPasswordRequest, SendMessageRequest, SignupRequest, SignupResponse, UpdateProfileRequest,
    VerifyUserRequest,
};
use yapyap_types::models::{Chat, Message, User};

use crate::error::{ClientError, Result};

/// A file picked by the user, sent as a multipart part.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum LoginResult {
    LoggedIn(AuthResponse),
    /// The account exists but its email is unconfirmed; a fresh code was mailed.
    NeedsVerification { user_id: Uuid, message: String },
}

/// Every REST operation the stores rely on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    // -- Auth --
    async fn check_auth(&self) -> Result<User>;
    async fn sign_up(&self, req: SignupRequest) -> Result<SignupResponse>;
    async fn verify(&self, req: VerifyUserRequest) -> Result<AuthResponse>;
    async fn resend_otp(&self, user_id: Uuid) -> Result<MessageBody>;
    async fn log_in(&self, req: LoginRequest) -> Result<LoginResult>;
    async fn log_out(&self) -> Result<MessageBody>;
    async fn request_password_reset(&self, email: String) -> Result<MessageBody>;
    async fn reset_password(&self, req: ResetPasswordRequest) -> Result<MessageBody>;

    // -- Users --
    async fn me(&self) -> Result<User>;
    async fn find_user(&self, username: String) -> Result<User>;
    async fn update_profile(&self, req: UpdateProfileRequest, avatar: Option<Attachment>) -> Result<User>;
    async fn request_email_change(&self, req: EmailChangeRequest) -> Result<MessageBody>;
    async fn confirm_email_change(&self, otp: String) -> Result<User>;
    async fn resend_email_change(&self) -> Result<MessageBody>;
    async fn request_account_deletion(&self, password: String) -> Result<MessageBody>;
    async fn confirm_account_deletion(&self, otp: String) -> Result<MessageBody>;

    // -- Chats --
    async fn list_chats(&self, page: u32, limit: u32) -> Result<Page<Chat>>;
    async fn access_chat(&self, user_id: Uuid) -> Result<Chat>;
    async fn create_group(&self, req: CreateGroupRequest) -> Result<Chat>;
    async fn rename_group(&self, req: RenameGroupRequest) -> Result<Chat>;
    async fn add_to_group(&self, req: MemberRequest) -> Result<Chat>;
    async fn remove_from_group(&self, req: MemberRequest) -> Result<RemoveMemberResponse>;
    async fn delete_chat(&self, chat_id: Uuid) -> Result<MessageBody>;

    // -- Messages --
    async fn list_messages(&self, chat_id: Uuid, page: u32, limit: u32) -> Result<Page<Message>>;
    async fn send_message(&self, req: SendMessageRequest, media: Option<Attachment>) -> Result<Message>;
    async fn mark_read(&self, req: MarkReadRequest) -> Result<CountBody>;
    async fn delete_message(&self, message_id: Uuid) -> Result<MessageBody>;
    async fn delete_chat_messages(&self, chat_id: Uuid) -> Result<CountBody>;
}

/// `ChatApi` over HTTP. The session cookie set by login/verify is kept in the
/// client's cookie store and sent with every later request.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let res = request.send().await?;
        read_json(res).await
    }
}

/// Decode a success body, or turn the server's `{ message }` into an error.
async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    let body = res.bytes().await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn api_error(status: StatusCode, body: &[u8]) -> ClientError {
    let message = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => err.message,
        Err(_) => status.canonical_reason().unwrap_or("Request failed").to_string(),
    };
    debug!("server answered {}: {}", status, message);
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

fn file_part(file: Attachment) -> Result<Part> {
    Ok(Part::bytes(file.data)
        .file_name(file.filename)
        .mime_str(&file.content_type)?)
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn check_auth(&self) -> Result<User> {
        self.call(self.client.get(self.url("/api/auth/check"))).await
    }

    async fn sign_up(&self, req: SignupRequest) -> Result<SignupResponse> {
        self.call(self.client.post(self.url("/api/auth/signup")).json(&req))
            .await
    }

    async fn verify(&self, req: VerifyUserRequest) -> Result<AuthResponse> {
        self.call(self.client.post(self.url("/api/auth/verify-user")).json(&req))
            .await
    }

    async fn resend_otp(&self, user_id: Uuid) -> Result<MessageBody> {
        let body = ResendOtpRequest { user_id };
        self.call(self.client.post(self.url("/api/auth/resend-otp")).json(&body))
            .await
    }

    async fn log_in(&self, req: LoginRequest) -> Result<LoginResult> {
        let res = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&req)
            .send()
            .await?;

        let status = res.status();
        let body = res.bytes().await?;
        if status.is_success() {
            return Ok(LoginResult::LoggedIn(serde_json::from_slice(&body)?));
        }

        // An unverified account is an expected outcome, not a failure.
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(ErrorBody {
                message,
                needs_verification: Some(true),
                user_id: Some(user_id),
            }) => Ok(LoginResult::NeedsVerification { user_id, message }),
            _ => Err(api_error(status, &body)),
        }
    }

    async fn log_out(&self) -> Result<MessageBody> {
        self.call(self.client.post(self.url("/api/auth/logout"))).await
    }

    async fn request_password_reset(&self, email: String) -> Result<MessageBody> {
        let body = RequestResetRequest { email };
        self.call(
            self.client
                .post(self.url("/api/auth/password/request-reset"))
                .json(&body),
        )
        .await
    }

    async fn reset_password(&self, req: ResetPasswordRequest) -> Result<MessageBody> {
        self.call(self.client.post(self.url("/api/auth/password/reset")).json(&req))
            .await
    }

    async fn me(&self) -> Result<User> {
        self.call(self.client.get(self.url("/api/user/me"))).await
    }

    async fn find_user(&self, username: String) -> Result<User> {
        self.call(
            self.client
                .get(self.url("/api/user/get/user"))
                .query(&[("userName", username)]),
        )
        .await
    }

    async fn update_profile(&self, req: UpdateProfileRequest, avatar: Option<Attachment>) -> Result<User> {
        let request = self.client.post(self.url("/api/user/update-profile"));
        let Some(avatar) = avatar else {
            return self.call(request.json(&req)).await;
        };

        let mut form = Form::new().part("avatar", file_part(avatar)?);
        if let Some(name) = req.name {
            form = form.text("name", name);
        }
        if let Some(user_name) = req.user_name {
            form = form.text("userName", user_name);
        }
        self.call(request.multipart(form)).await
    }

    async fn request_email_change(&self, req: EmailChangeRequest) -> Result<MessageBody> {
        self.call(
            self.client
                .post(self.url("/api/user/email/change/request"))
                .json(&req),
        )
        .await
    }

    async fn confirm_email_change(&self, otp: String) -> Result<User> {
        self.call(
            self.client
                .post(self.url("/api/user/email/change/confirm"))
                .json(&OtpRequest { otp }),
        )
        .await
    }

    async fn resend_email_change(&self) -> Result<MessageBody> {
        self.call(self.client.post(self.url("/api/user/email/change/resend")))
            .await
    }

    async fn request_account_deletion(&self, password: String) -> Result<MessageBody> {
        self.call(
            self.client
                .post(self.url("/api/user/delete-account/request"))
                .json(&PasswordRequest { password }),
        )
        .await
    }

    async fn confirm_account_deletion(&self, otp: String) -> Result<MessageBody> {
        self.call(
            self.client
                .post(self.url("/api/user/delete-account/confirm"))
                .json(&OtpRequest { otp }),
        )
        .await
    }

    async fn list_chats(&self, page: u32, limit: u32) -> Result<Page<Chat>> {
        self.call(
            self.client
                .get(self.url("/api/chat"))
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    async fn access_chat(&self, user_id: Uuid) -> Result<Chat> {
        let body = AccessChatRequest {
            user_id: Some(user_id),
        };
        self.call(self.client.post(self.url("/api/chat/access")).json(&body))
            .await
    }

    async fn create_group(&self, req: CreateGroupRequest) -> Result<Chat> {
        self.call(self.client.post(self.url("/api/chat/group")).json(&req))
            .await
    }

    async fn rename_group(&self, req: RenameGroupRequest) -> Result<Chat> {
        self.call(self.client.put(self.url("/api/chat/rename")).json(&req))
            .await
    }

    async fn add_to_group(&self, req: MemberRequest) -> Result<Chat> {
        self.call(self.client.put(self.url("/api/chat/add")).json(&req))
            .await
    }

    async fn remove_from_group(&self, req: MemberRequest) -> Result<RemoveMemberResponse> {
        self.call(self.client.put(self.url("/api/chat/remove")).json(&req))
            .await
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<MessageBody> {
        self.call(self.client.delete(self.url(&format!("/api/chat/{}", chat_id))))
            .await
    }

    async fn list_messages(&self, chat_id: Uuid, page: u32, limit: u32) -> Result<Page<Message>> {
        self.call(
            self.client
                .get(self.url(&format!("/api/message/{}", chat_id)))
                .query(&[("page", page.to_string()), ("limit", limit.to_string())])
                .query(&[("sort", "asc")]),
        )
        .await
    }

    async fn send_message(&self, req: SendMessageRequest, media: Option<Attachment>) -> Result<Message> {
        let request = self.client.post(self.url("/api/message"));
        let Some(media) = media else {
            return self.call(request.json(&req)).await;
        };

        let mut form = Form::new().part("media", file_part(media)?);
        if let Some(chat_id) = req.chat_id {
            form = form.text("chatId", chat_id.to_string());
        }
        if let Some(content) = req.content {
            form = form.text("content", content);
        }
        if let Some(receiver) = req.receiver {
            form = form.text("receiver", receiver.to_string());
        }
        if let Some(message_type) = req.message_type {
            form = form.text("messageType", message_type.as_str());
        }
        self.call(request.multipart(form)).await
    }

    async fn mark_read(&self, req: MarkReadRequest) -> Result<CountBody> {
        self.call(self.client.put(self.url("/api/message/read")).json(&req))
            .await
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<MessageBody> {
        self.call(
            self.client
                .delete(self.url(&format!("/api/message/{}", message_id))),
        )
        .await
    }

    async fn delete_chat_messages(&self, chat_id: Uuid) -> Result<CountBody> {
        self.call(
            self.client
                .delete(self.url(&format!("/api/message/chat/{}", chat_id))),
        )
        .await
    }
}
