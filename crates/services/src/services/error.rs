use remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}
