use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad input shape or bounds. Never retried, never degraded.
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote unreachable, timed out, or answered with a server error.
    #[error("remote store unavailable: {0}")]
    TransientStore(String),

    /// On-device storage failed (quota, serialization). There is no further fallback.
    #[error("local store error: {0}")]
    LocalStore(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure should be absorbed by falling back to local storage.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
