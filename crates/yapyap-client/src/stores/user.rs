use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use yapyap_types::api::{
    EmailChangeRequest, LoginRequest, ResetPasswordRequest, SignupRequest, UpdateProfileRequest,
    VerifyUserRequest,
};
use yapyap_types::models::User;

use super::report;
use crate::api::{Attachment, ChatApi, LoginResult};
use crate::error::{ClientError, Result};
use crate::notify::Notifier;

/// The signed-in user and the account waiting for email verification.
pub struct UserStore {
    api: Arc<dyn ChatApi>,
    notifier: Arc<dyn Notifier>,
    user: Option<User>,
    token: Option<String>,
    pending_verification: Option<Uuid>,
    loading: bool,
    checking_auth: bool,
}

impl UserStore {
    pub fn new(api: Arc<dyn ChatApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            user: None,
            token: None,
            pending_verification: None,
            loading: false,
            checking_auth: false,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Session token for the gateway connection, once logged in.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn pending_verification(&self) -> Option<Uuid> {
        self.pending_verification
    }

    pub fn needs_verification(&self) -> bool {
        self.pending_verification.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_checking_auth(&self) -> bool {
        self.checking_auth
    }

    /// Ask the server whether the stored session is still good. A missing
    /// session is the normal logged-out state and is not reported.
    pub async fn check_auth(&mut self) -> Option<&User> {
        self.checking_auth = true;
        let result = self.api.check_auth().await;
        self.checking_auth = false;

        match result {
            Ok(user) => self.user = Some(user),
            Err(e) => {
                debug!("no session: {}", e);
                self.user = None;
            }
        }
        self.user.as_ref()
    }

    pub async fn sign_up(&mut self, req: SignupRequest) -> Result<Uuid> {
        self.loading = true;
        let result = self.api.sign_up(req).await;
        self.loading = false;

        let res = report(self.notifier.as_ref(), result)?;
        self.pending_verification = Some(res.user_id);
        self.notifier.success(&res.message);
        Ok(res.user_id)
    }

    /// Confirm the pending account with the emailed code and log it in.
    pub async fn verify(&mut self, otp: &str) -> Result<User> {
        let user_id = self.pending_user()?;

        self.loading = true;
        let req = VerifyUserRequest {
            user_id,
            otp: otp.trim().to_string(),
        };
        let result = self.api.verify(req).await;
        self.loading = false;

        let res = report(self.notifier.as_ref(), result)?;
        self.pending_verification = None;
        self.start_session(res.user.clone(), res.token);
        self.notifier.success(&res.message);
        Ok(res.user)
    }

    pub async fn resend_otp(&mut self) -> Result<()> {
        let user_id = self.pending_user()?;

        self.loading = true;
        let result = self.api.resend_otp(user_id).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    /// Log in with a username or email. An unverified account is not an
    /// error: its id is kept so `verify` can finish the job.
    pub async fn log_in(&mut self, identifier: &str, password: &str) -> Result<LoginResult> {
        self.loading = true;
        let req = LoginRequest {
            identifier: identifier.trim().to_string(),
            password: password.to_string(),
        };
        let result = self.api.log_in(req).await;
        self.loading = false;

        let outcome = report(self.notifier.as_ref(), result)?;
        match &outcome {
            LoginResult::LoggedIn(res) => {
                self.pending_verification = None;
                self.start_session(res.user.clone(), res.token.clone());
                self.notifier.success(&res.message);
            }
            LoginResult::NeedsVerification { user_id, message } => {
                self.pending_verification = Some(*user_id);
                self.notifier.error(message);
            }
        }
        Ok(outcome)
    }

    pub async fn log_out(&mut self) -> Result<()> {
        self.loading = true;
        let result = self.api.log_out().await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.end_session();
        self.notifier.success(&ack.message);
        Ok(())
    }

    pub async fn forgot_password(&mut self, email: &str) -> Result<()> {
        self.loading = true;
        let result = self.api.request_password_reset(email.trim().to_string()).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    pub async fn reset_password(&mut self, req: ResetPasswordRequest) -> Result<()> {
        self.loading = true;
        let result = self.api.reset_password(req).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    /// Look another user up by username. Does not change the store.
    pub async fn find_user(&mut self, username: &str) -> Result<User> {
        self.loading = true;
        let result = self.api.find_user(username.trim().to_string()).await;
        self.loading = false;

        report(self.notifier.as_ref(), result)
    }

    pub async fn update_profile(&mut self, req: UpdateProfileRequest, avatar: Option<Attachment>) -> Result<User> {
        self.loading = true;
        let result = self.api.update_profile(req, avatar).await;
        self.loading = false;

        let user = report(self.notifier.as_ref(), result)?;
        self.user = Some(user.clone());
        self.notifier.success("Profile updated");
        Ok(user)
    }

    pub async fn request_email_update(&mut self, email: &str, password: &str) -> Result<()> {
        self.loading = true;
        let req = EmailChangeRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let result = self.api.request_email_change(req).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    pub async fn confirm_email_update(&mut self, otp: &str) -> Result<User> {
        self.loading = true;
        let result = self.api.confirm_email_change(otp.trim().to_string()).await;
        self.loading = false;

        let user = report(self.notifier.as_ref(), result)?;
        self.user = Some(user.clone());
        self.notifier.success("Email updated");
        Ok(user)
    }

    pub async fn resend_email_otp(&mut self) -> Result<()> {
        self.loading = true;
        let result = self.api.resend_email_change().await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    pub async fn request_delete_account(&mut self, password: &str) -> Result<()> {
        self.loading = true;
        let result = self.api.request_account_deletion(password.to_string()).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.notifier.success(&ack.message);
        Ok(())
    }

    /// Confirm deletion with the emailed code. The session ends with it.
    pub async fn confirm_delete_account(&mut self, otp: &str) -> Result<()> {
        self.loading = true;
        let result = self.api.confirm_account_deletion(otp.trim().to_string()).await;
        self.loading = false;

        let ack = report(self.notifier.as_ref(), result)?;
        self.end_session();
        self.notifier.success(&ack.message);
        Ok(())
    }

    fn pending_user(&self) -> Result<Uuid> {
        let pending = self
            .pending_verification
            .ok_or_else(|| ClientError::State("No account is waiting for verification".into()));
        report(self.notifier.as_ref(), pending)
    }

    fn start_session(&mut self, user: User, token: String) {
        self.user = Some(user);
        self.token = Some(token);
    }

    fn end_session(&mut self) {
        self.user = None;
        self.token = None;
    }
}
