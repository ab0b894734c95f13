use std::sync::Arc;

use yapyap_db::Database;
use yapyap_gateway::Dispatcher;

use crate::mailer::Mailer;
use crate::media::MediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub auth: AuthSettings,
    pub mailer: Arc<dyn Mailer>,
    pub media: Arc<dyn MediaStore>,
}

/// Token and session cookie settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub token_ttl_secs: i64,
    /// Production cookies are `Secure` and `SameSite=None` so a frontend on
    /// another origin can send them.
    pub secure_cookies: bool,
}

impl AuthSettings {
    pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl_secs: Self::DEFAULT_TOKEN_TTL_SECS,
            secure_cookies: false,
        }
    }
}
