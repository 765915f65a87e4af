use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a VaultSpace (a top-level encrypted namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultSpaceId(pub String);

impl VaultSpaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VaultSpaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A VaultSpace key as the backend stores it: wrapped under the owner's
/// user key, base64url-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    pub vaultspace_id: VaultSpaceId,
    pub encrypted_key: String,
}

/// Payload of the atomic password + key update.
///
/// Not `Serialize`: the HTTP client exposes the passwords only while
/// building the request body.
#[derive(Debug)]
pub struct PasswordUpdate {
    pub current_password: SecretString,
    pub new_password: SecretString,
    pub reencrypted_keys: Vec<WrappedKeyRecord>,
}
