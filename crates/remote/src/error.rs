use strum_macros::Display;
use thiserror::Error;

/// Coarse classification every remote failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    NotFound,
    Invalid,
    Permission,
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    #[error("rate limited")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Transport(String),
    #[error("json error: {0}")]
    Serde(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
}

impl RemoteError {
    /// Map a non-success HTTP status to a structured error
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited,
            404 => Self::NotFound(body),
            400 | 422 => Self::Invalid(body),
            401 | 403 => Self::Permission(body),
            _ => Self::Http { status, body },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Timeout | Self::Transport(_) | Self::Serde(_) | Self::Http { .. } => {
                ErrorKind::Unknown
            }
        }
    }

    /// Only rate limiting is retried with back-off
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ErrorKind::RateLimited
    }

    /// Retrying a permanent failure can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::Invalid | ErrorKind::Permission
        )
    }
}
