use thiserror::Error;

/// Errors surfaced to the embedding UI.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential missing or expired; the UI should send the user to login.
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The server could not reach its store. Worth one retry.
    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    #[error("HTTP error: {0}")]
    Http(Box<reqwest::Error>),

    #[error("unexpected response ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no room is open")]
    NoActiveRoom,

    #[error("unknown local message {0}")]
    UnknownLocalMessage(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            400 => Self::InvalidInput(message),
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            503 => Self::Transient(message),
            _ => Self::Api { code, message },
        }
    }

    /// Failures where repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(Box::new(e))
    }
}
