use thiserror::Error;

use crate::backend::BackendError;

pub type VspaceResult<T> = Result<T, VspaceError>;

#[derive(Debug, Error)]
pub enum VspaceError {
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("key store error: {0}")]
    KeyStore(String),

    #[error("password rotation failed: {0}")]
    Rotation(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
