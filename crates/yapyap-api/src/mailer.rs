use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::otp::OTP_TTL_MINUTES;

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Outgoing transactional mail. Callers treat delivery as best-effort.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<()>;
}

/// Mail sent through the SendGrid v3 API.
pub struct SendGridMailer {
    client: Client,
    api_key: String,
    from: String,
}

impl SendGridMailer {
    pub fn new(api_key: String, from: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building SendGrid HTTP client")?;
        Ok(Self {
            client,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: Email) -> Result<()> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        });

        let res = self
            .client
            .post(SENDGRID_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("SendGrid request failed")?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            bail!("SendGrid rejected mail to {} ({}): {}", email.to, status, detail);
        }

        info!("Email queued to {} [status {}]", email.to, status.as_u16());
        Ok(())
    }
}

/// Installed when no provider is configured. Every send fails, which the
/// best-effort caller logs.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, email: Email) -> Result<()> {
        bail!("email is not configured, dropping mail to {}", email.to)
    }
}

/// The one-time code mail shared by every OTP flow.
pub fn otp_email(to: &str, code: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Your Yapyap verification code".into(),
        text: format!("Your OTP is {}. It expires in {} minutes.", code, OTP_TTL_MINUTES),
        html: format!(
            "<div style=\"max-width:420px;margin:2rem auto;padding:2rem;text-align:center\">\
             <h1>Welcome to Yapyap</h1>\
             <p>Your OTP is: <strong>{}</strong></p>\
             <p>This code expires in {} minutes.</p>\
             <p>If you didn't request this, you can safely ignore this email.</p>\
             </div>",
            code, OTP_TTL_MINUTES
        ),
    }
}
