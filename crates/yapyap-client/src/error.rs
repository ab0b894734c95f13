use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body; `message` is its text.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("socket error: {0}")]
    Socket(String),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    State(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
