//! Contract of the REST collaborator that persists salts and wrapped keys.
//!
//! The backend only ever sees base64 salts and wrapped envelopes. It is
//! expected to apply a [`PasswordUpdate`] atomically: either the new password
//! hash and every re-wrapped key are persisted, or nothing is.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{PasswordUpdate, WrappedKeyRecord};

#[derive(Debug, Error)]
pub enum BackendError {
    /// Request never produced a response (DNS, TLS, timeout, connection reset).
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("server rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server answered but the body could not be understood.
    #[error("malformed server response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// The account's master-key salt, base64-encoded.
    async fn fetch_salt(&self) -> Result<String, BackendError>;

    /// Every wrapped VaultSpace key the account owns.
    async fn list_wrapped_keys(&self) -> Result<Vec<WrappedKeyRecord>, BackendError>;

    /// Submit the new password together with the full re-wrapped key set.
    async fn submit_password_change(&self, update: PasswordUpdate) -> Result<(), BackendError>;
}
