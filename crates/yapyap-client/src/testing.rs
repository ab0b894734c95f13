use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use yapyap_types::api::{
    AuthResponse, CountBody, CreateGroupRequest, EmailChangeRequest, LoginRequest, MarkReadRequest,
    MemberRequest, MessageBody, Page, RemoveMemberResponse, RenameGroupRequest,
    ResetPasswordRequest, SendMessageRequest, SignupRequest, SignupResponse, UpdateProfileRequest,
    VerifyUserRequest,
};
use yapyap_types::events::GatewayCommand;
use yapyap_types::models::{Chat, ChatKind, ChatSummary, Message, MessageType, User};

use crate::api::{Attachment, ChatApi, LoginResult};
use crate::error::{ClientError, Result};
use crate::notify::Notifier;
use crate::realtime::RoomSubscriber;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn user(username: &str) -> User {
    User {
        id: Uuid::new_v4(),
        name: username.to_string(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        avatar: None,
        is_verified: true,
        created_at: epoch(),
    }
}

pub(crate) fn direct(a: &User, b: &User) -> Chat {
    Chat {
        id: Uuid::new_v4(),
        kind: ChatKind::OneToOne,
        members: vec![a.clone(), b.clone()],
        latest_message: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub(crate) fn group(name: &str, admin: &User, others: &[&User]) -> Chat {
    let mut members = vec![admin.clone()];
    members.extend(others.iter().map(|u| (*u).clone()));
    Chat {
        id: Uuid::new_v4(),
        kind: ChatKind::Group {
            name: name.to_string(),
            avatar: None,
            admin: admin.id,
        },
        members,
        latest_message: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

/// A text message `minute` minutes after a fixed epoch.
pub(crate) fn message(chat: &Chat, sender: &User, content: &str, minute: i64) -> Message {
    let receiver = chat
        .other_member(sender.id)
        .map_or(chat.id, |other| other.id);
    Message {
        id: Uuid::new_v4(),
        chat: ChatSummary {
            id: chat.id,
            kind: chat.kind.clone(),
            members: chat.members.iter().map(|m| m.id).collect(),
        },
        sender: sender.clone(),
        receiver,
        content: Some(content.to_string()),
        message_type: MessageType::Text,
        media: None,
        read_by: vec![sender.id],
        created_at: epoch() + Duration::minutes(minute),
    }
}

fn paginate<T: Clone>(items: &[T], page: u32, limit: u32) -> Page<T> {
    let start = (page.saturating_sub(1) * limit) as usize;
    Page {
        data: items.iter().skip(start).take(limit as usize).cloned().collect(),
        page,
        limit,
    }
}

/// Server state the fake answers from.
#[derive(Default)]
pub(crate) struct FakeState {
    pub me: Option<User>,
    pub chats: Vec<Chat>,
    pub messages: Vec<Message>,
    /// The next call fails with this status and message.
    pub fail_next: Option<(u16, String)>,
    /// `log_in` reports this account as unverified.
    pub unverified: Option<Uuid>,
    pub calls: Vec<&'static str>,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn with(setup: impl FnOnce(&mut FakeState)) -> Arc<Self> {
        let api = Self::default();
        setup(&mut api.state());
        Arc::new(api)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn fail_next(&self, status: u16, message: &str) {
        self.state().fail_next = Some((status, message.to_string()));
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == name).count()
    }

    fn begin(&self, name: &'static str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(name);
        match state.fail_next.take() {
            Some((status, message)) => Err(ClientError::Api { status, message }),
            None => Ok(state),
        }
    }
}

fn ack(message: &str) -> MessageBody {
    MessageBody::new(message)
}

fn not_found(what: &str) -> ClientError {
    ClientError::Api {
        status: 404,
        message: format!("{} not found", what),
    }
}

fn me(state: &FakeState) -> Result<User> {
    state.me.clone().ok_or(ClientError::Api {
        status: 401,
        message: "Unauthorized".into(),
    })
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn check_auth(&self) -> Result<User> {
        me(&*self.begin("check_auth")?)
    }

    async fn sign_up(&self, req: SignupRequest) -> Result<SignupResponse> {
        let _state = self.begin("sign_up")?;
        Ok(SignupResponse {
            message: "Signup successful".into(),
            user_id: Uuid::new_v4(),
            email: req.email,
        })
    }

    async fn verify(&self, req: VerifyUserRequest) -> Result<AuthResponse> {
        let mut state = self.begin("verify")?;
        let mut verified = user("fresh");
        verified.id = req.user_id;
        state.me = Some(verified.clone());
        Ok(AuthResponse {
            message: "Account verified".into(),
            user: verified,
            token: "token".into(),
        })
    }

    async fn resend_otp(&self, _user_id: Uuid) -> Result<MessageBody> {
        let _state = self.begin("resend_otp")?;
        Ok(ack("A new code has been sent"))
    }

    async fn log_in(&self, req: LoginRequest) -> Result<LoginResult> {
        let mut state = self.begin("log_in")?;
        if let Some(user_id) = state.unverified {
            return Ok(LoginResult::NeedsVerification {
                user_id,
                message: "please verify your account before logging in".into(),
            });
        }
        let logged_in = state.me.clone().unwrap_or_else(|| user(&req.identifier));
        state.me = Some(logged_in.clone());
        Ok(LoginResult::LoggedIn(AuthResponse {
            message: "Logged in".into(),
            user: logged_in,
            token: "token".into(),
        }))
    }

    async fn log_out(&self) -> Result<MessageBody> {
        self.begin("log_out")?.me = None;
        Ok(ack("Logged out"))
    }

    async fn request_password_reset(&self, _email: String) -> Result<MessageBody> {
        let _state = self.begin("request_password_reset")?;
        Ok(ack("If that email is registered, a reset code has been sent"))
    }

    async fn reset_password(&self, _req: ResetPasswordRequest) -> Result<MessageBody> {
        let _state = self.begin("reset_password")?;
        Ok(ack("Password updated"))
    }

    async fn me(&self) -> Result<User> {
        me(&*self.begin("me")?)
    }

    async fn find_user(&self, username: String) -> Result<User> {
        let _state = self.begin("find_user")?;
        Ok(user(&username))
    }

    async fn update_profile(&self, req: UpdateProfileRequest, avatar: Option<Attachment>) -> Result<User> {
        let mut state = self.begin("update_profile")?;
        let mut updated = me(&state)?;
        if let Some(name) = req.name {
            updated.name = name;
        }
        if let Some(avatar) = avatar {
            updated.avatar = Some(format!("https://cdn.test/{}", avatar.filename));
        }
        state.me = Some(updated.clone());
        Ok(updated)
    }

    async fn request_email_change(&self, _req: EmailChangeRequest) -> Result<MessageBody> {
        let _state = self.begin("request_email_change")?;
        Ok(ack("Verification code sent to the new email"))
    }

    async fn confirm_email_change(&self, _otp: String) -> Result<User> {
        let mut state = self.begin("confirm_email_change")?;
        let mut updated = me(&state)?;
        updated.email = "new@example.com".into();
        state.me = Some(updated.clone());
        Ok(updated)
    }

    async fn resend_email_change(&self) -> Result<MessageBody> {
        let _state = self.begin("resend_email_change")?;
        Ok(ack("A new code has been sent"))
    }

    async fn request_account_deletion(&self, _password: String) -> Result<MessageBody> {
        let _state = self.begin("request_account_deletion")?;
        Ok(ack("Check your email to confirm"))
    }

    async fn confirm_account_deletion(&self, _otp: String) -> Result<MessageBody> {
        self.begin("confirm_account_deletion")?.me = None;
        Ok(ack("Account deleted"))
    }

    async fn list_chats(&self, page: u32, limit: u32) -> Result<Page<Chat>> {
        let state = self.begin("list_chats")?;
        Ok(paginate(&state.chats, page, limit))
    }

    async fn access_chat(&self, user_id: Uuid) -> Result<Chat> {
        let mut state = self.begin("access_chat")?;
        let me = me(&state)?;
        if let Some(chat) = state
            .chats
            .iter()
            .find(|c| c.other_member(me.id).is_some_and(|u| u.id == user_id))
        {
            return Ok(chat.clone());
        }
        let mut other = user("someone");
        other.id = user_id;
        let chat = direct(&me, &other);
        state.chats.insert(0, chat.clone());
        Ok(chat)
    }

    async fn create_group(&self, req: CreateGroupRequest) -> Result<Chat> {
        let mut state = self.begin("create_group")?;
        let admin = me(&state)?;
        let chat = group(&req.name, &admin, &[]);
        state.chats.insert(0, chat.clone());
        Ok(chat)
    }

    async fn rename_group(&self, req: RenameGroupRequest) -> Result<Chat> {
        let mut state = self.begin("rename_group")?;
        let chat = state
            .chats
            .iter_mut()
            .find(|c| c.id == req.chat_id)
            .ok_or_else(|| not_found("Chat"))?;
        if let (ChatKind::Group { name, .. }, Some(new_name)) = (&mut chat.kind, req.name) {
            *name = new_name;
        }
        Ok(chat.clone())
    }

    async fn add_to_group(&self, req: MemberRequest) -> Result<Chat> {
        let mut state = self.begin("add_to_group")?;
        let chat = state
            .chats
            .iter_mut()
            .find(|c| c.id == req.chat_id)
            .ok_or_else(|| not_found("Chat"))?;
        let mut member = user("member");
        member.id = req.user_id;
        chat.members.push(member);
        Ok(chat.clone())
    }

    async fn remove_from_group(&self, req: MemberRequest) -> Result<RemoveMemberResponse> {
        let mut state = self.begin("remove_from_group")?;
        let index = state
            .chats
            .iter()
            .position(|c| c.id == req.chat_id)
            .ok_or_else(|| not_found("Chat"))?;
        state.chats[index].members.retain(|m| m.id != req.user_id);
        if state.chats[index].members.is_empty() {
            state.chats.remove(index);
            return Ok(RemoveMemberResponse::Deleted {
                message: "Group deleted".into(),
                chat_id: req.chat_id,
            });
        }
        Ok(RemoveMemberResponse::Updated(state.chats[index].clone()))
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<MessageBody> {
        let mut state = self.begin("delete_chat")?;
        state.chats.retain(|c| c.id != chat_id);
        state.messages.retain(|m| m.chat.id != chat_id);
        Ok(ack("Chat deleted"))
    }

    async fn list_messages(&self, chat_id: Uuid, page: u32, limit: u32) -> Result<Page<Message>> {
        let state = self.begin("list_messages")?;
        let in_chat: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.chat.id == chat_id)
            .cloned()
            .collect();
        Ok(paginate(&in_chat, page, limit))
    }

    async fn send_message(&self, req: SendMessageRequest, media: Option<Attachment>) -> Result<Message> {
        let mut state = self.begin("send_message")?;
        let sender = me(&state)?;
        let chat_id = req.chat_id.ok_or(ClientError::Api {
            status: 400,
            message: "chatId is required".into(),
        })?;
        let chat = state
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .ok_or_else(|| not_found("Chat"))?;
        let minute = state.messages.len() as i64;
        let mut sent = message(chat, &sender, req.content.as_deref().unwrap_or(""), minute);
        if media.is_some() {
            sent.message_type = MessageType::Media;
        }
        state.messages.push(sent.clone());
        Ok(sent)
    }

    async fn mark_read(&self, req: MarkReadRequest) -> Result<CountBody> {
        let mut state = self.begin("mark_read")?;
        let reader = me(&state)?.id;
        let mut count = 0;
        for msg in state.messages.iter_mut() {
            let targeted = match (req.message_id, req.chat_id) {
                (Some(id), _) => msg.id == id,
                (None, Some(chat_id)) => msg.chat.id == chat_id,
                (None, None) => false,
            };
            if targeted && !msg.read_by.contains(&reader) {
                msg.read_by.push(reader);
                count += 1;
            }
        }
        Ok(CountBody {
            message: "Marked as read".into(),
            count,
        })
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<MessageBody> {
        let mut state = self.begin("delete_message")?;
        state.messages.retain(|m| m.id != message_id);
        Ok(ack("Message deleted"))
    }

    async fn delete_chat_messages(&self, chat_id: Uuid) -> Result<CountBody> {
        let mut state = self.begin("delete_chat_messages")?;
        let before = state.messages.len();
        state.messages.retain(|m| m.chat.id != chat_id);
        Ok(CountBody {
            message: "Messages deleted".into(),
            count: before - state.messages.len(),
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    successes: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.successes.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub(crate) struct RecordingRooms {
    commands: Mutex<Vec<GatewayCommand>>,
}

impl RecordingRooms {
    pub(crate) fn commands(&self) -> Vec<GatewayCommand> {
        self.commands.lock().unwrap().clone()
    }
}

impl RoomSubscriber for RecordingRooms {
    fn join_room(&self, chat_id: Uuid) {
        self.commands
            .lock()
            .unwrap()
            .push(GatewayCommand::JoinRoom { chat_id });
    }

    fn leave_room(&self, chat_id: Uuid) {
        self.commands
            .lock()
            .unwrap()
            .push(GatewayCommand::LeaveRoom { chat_id });
    }
}
