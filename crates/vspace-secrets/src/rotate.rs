//! Password rotation: re-wrap every VaultSpace key, then swap the master
//!
//! Rotation flow:
//!   1. Validate the new password against the policy (no I/O yet)
//!   2. Resolve the salt, from the session or the backend
//!   3. Derive old and new user keys (same salt; the salt never rotates)
//!   4. Fetch every wrapped VaultSpace key
//!   5. Unwrap each under the old key and wrap it under the new one
//!   6. Submit the password change and the full re-wrapped set together
//!   7. Replace the session master and clear stale key store entries
//!
//! Steps 5 and 6 are all-or-nothing: one failed unwrap aborts before any
//! network write, and nothing local changes unless the backend accepted
//! the update. Progress is published on a `watch` channel.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use vspace_core::config::PolicyConfig;
use vspace_core::{AccountBackend, BackendError, PasswordUpdate, VspaceError, WrappedKeyRecord};
use vspace_crypto::{
    derive_from_password, unwrap_key, wrap_key, CryptoError, DerivedMaster, EnvelopeFormat,
    KdfProfile, Salt,
};

use crate::session::Session;

/// Coordinator state, observable through [`RotationCoordinator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    Authenticating,
    FetchingKeys,
    Reencrypting,
    Submitting,
    Done,
    Failed,
}

/// Rotation failure categories. Messages never carry key material or
/// passwords.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    #[error("new password must be at least {min_length} characters")]
    InvalidNewPassword { min_length: usize },

    #[error("new password and confirmation do not match")]
    ConfirmationMismatch,

    #[error("current password is incorrect")]
    WrongCurrentPassword,

    #[error("network failure during password change")]
    NetworkFailure,

    #[error("server rejected the password change")]
    ServerRejected,

    #[error("key derivation or encryption failed")]
    KeyDerivation,
}

impl From<RotationError> for VspaceError {
    fn from(e: RotationError) -> Self {
        VspaceError::Rotation(e.to_string())
    }
}

impl From<BackendError> for RotationError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Network(_) => RotationError::NetworkFailure,
            BackendError::Rejected { .. } | BackendError::Malformed(_) => {
                RotationError::ServerRejected
            }
        }
    }
}

/// Requirements a new password must meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl PasswordPolicy {
    /// Length is counted in characters, not bytes.
    pub fn check(&self, new_password: &SecretString) -> Result<(), RotationError> {
        if new_password.expose_secret().chars().count() < self.min_length {
            return Err(RotationError::InvalidNewPassword {
                min_length: self.min_length,
            });
        }
        Ok(())
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for PasswordPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            min_length: config.min_password_length,
        }
    }
}

pub struct PasswordChangeRequest {
    pub current_password: SecretString,
    pub new_password: SecretString,
    pub confirmation: SecretString,
}

impl std::fmt::Debug for PasswordChangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordChangeRequest").finish_non_exhaustive()
    }
}

/// Outcome of a successful rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationReport {
    /// VaultSpace keys re-wrapped and accepted by the backend
    pub rewrapped: usize,
    /// Inputs that were in the signed format
    pub signed_inputs: usize,
    /// Inputs that were in the legacy unsigned format
    pub legacy_inputs: usize,
    /// Whether the new master secret reached the key store
    pub session_persisted: bool,
}

/// Drives a password change against an [`AccountBackend`].
pub struct RotationCoordinator<B> {
    backend: B,
    policy: PasswordPolicy,
    state_tx: watch::Sender<RotationState>,
}

impl<B: AccountBackend> RotationCoordinator<B> {
    pub fn new(backend: B, policy: PasswordPolicy) -> Self {
        let (state_tx, _) = watch::channel(RotationState::Idle);
        Self {
            backend,
            policy,
            state_tx,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> RotationState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RotationState> {
        self.state_tx.subscribe()
    }

    /// Change the account password and re-wrap every VaultSpace key.
    ///
    /// On error the backend has received no update (or refused it) and the
    /// session and key store are exactly as before.
    pub async fn change_password(
        &self,
        session: &mut Session,
        request: PasswordChangeRequest,
    ) -> Result<RotationReport, RotationError> {
        match self.run(session, request).await {
            Ok(report) => {
                self.transition(RotationState::Done);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("password change failed: {e}");
                self.transition(RotationState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut Session,
        request: PasswordChangeRequest,
    ) -> Result<RotationReport, RotationError> {
        self.transition(RotationState::Authenticating);

        self.policy.check(&request.new_password)?;
        if request.new_password.expose_secret() != request.confirmation.expose_secret() {
            return Err(RotationError::ConfirmationMismatch);
        }

        let salt = match session.cached_salt() {
            Some(salt) => salt,
            None => {
                let encoded = self.backend.fetch_salt().await?;
                Salt::from_base64(&encoded).map_err(|e| {
                    tracing::warn!("backend returned an unusable salt: {e}");
                    RotationError::ServerRejected
                })?
            }
        };

        let old = derive_off_thread(request.current_password.clone(), salt).await?;
        let new = derive_off_thread(request.new_password.clone(), salt).await?;
        let old_key = old.master.to_exportable();
        let new_key = new.master.to_exportable();

        self.transition(RotationState::FetchingKeys);
        let records = self.backend.list_wrapped_keys().await?;

        self.transition(RotationState::Reencrypting);
        let mut rewrapped = Vec::with_capacity(records.len());
        let mut signed_inputs = 0;
        let mut legacy_inputs = 0;
        for (index, record) in records.iter().enumerate() {
            let unwrapped = unwrap_key(&old_key, &record.encrypted_key).map_err(|e| {
                tracing::warn!(
                    vaultspace = %record.vaultspace_id,
                    index,
                    "could not unwrap key with current password: {e}"
                );
                RotationError::WrongCurrentPassword
            })?;
            if unwrapped.tag_rejected {
                tracing::warn!(
                    vaultspace = %record.vaultspace_id,
                    "signature did not verify; key recovered from legacy format"
                );
            }
            match unwrapped.format {
                EnvelopeFormat::Signed => signed_inputs += 1,
                EnvelopeFormat::Unsigned => legacy_inputs += 1,
            }

            let encrypted_key = wrap_key(&new_key, &unwrapped.key).map_err(derivation_failed)?;
            rewrapped.push(WrappedKeyRecord {
                vaultspace_id: record.vaultspace_id.clone(),
                encrypted_key,
            });
        }
        tracing::info!(
            keys = rewrapped.len(),
            signed_inputs,
            legacy_inputs,
            "re-wrapped all vaultspace keys"
        );

        self.transition(RotationState::Submitting);
        let count = rewrapped.len();
        self.backend
            .submit_password_change(PasswordUpdate {
                current_password: request.current_password,
                new_password: request.new_password,
                reencrypted_keys: rewrapped,
            })
            .await?;

        // Backend committed: everything tied to the old password goes
        let session_persisted = match session.replace_master(new.master, salt) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("password changed but the key store update was incomplete: {e}");
                false
            }
        };

        Ok(RotationReport {
            rewrapped: count,
            signed_inputs,
            legacy_inputs,
            session_persisted,
        })
    }

    fn transition(&self, state: RotationState) {
        tracing::debug!(?state, "rotation state");
        self.state_tx.send_replace(state);
    }
}

/// Argon2id on the blocking pool so the executor keeps serving other tasks.
async fn derive_off_thread(
    password: SecretString,
    salt: Salt,
) -> Result<DerivedMaster, RotationError> {
    tokio::task::spawn_blocking(move || {
        derive_from_password(&password, Some(salt), KdfProfile::Argon2id)
    })
    .await
    .map_err(|e| {
        tracing::warn!("key derivation task failed: {e}");
        RotationError::KeyDerivation
    })?
    .map_err(derivation_failed)
}

fn derivation_failed(e: CryptoError) -> RotationError {
    tracing::warn!("rotation crypto failure: {e}");
    RotationError::KeyDerivation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_counts_characters() {
        let policy = PasswordPolicy { min_length: 12 };
        assert!(policy.check(&SecretString::from("short")).is_err());
        assert!(policy.check(&SecretString::from("twelve chars")).is_ok());
        // 12 characters, 24 bytes
        assert!(policy.check(&SecretString::from("é".repeat(12))).is_ok());
        assert!(policy.check(&SecretString::from("é".repeat(11))).is_err());
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(PasswordPolicy::default().min_length, 12);
    }

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(
            RotationError::from(BackendError::Network("reset".into())),
            RotationError::NetworkFailure
        );
        assert_eq!(
            RotationError::from(BackendError::Rejected {
                status: 409,
                message: "conflict".into()
            }),
            RotationError::ServerRejected
        );
        assert_eq!(
            RotationError::from(BackendError::Malformed("not json".into())),
            RotationError::ServerRejected
        );
    }

    #[test]
    fn test_request_debug_redacted() {
        let request = PasswordChangeRequest {
            current_password: SecretString::from("hunter2-current"),
            new_password: SecretString::from("hunter2-new-password"),
            confirmation: SecretString::from("hunter2-new-password"),
        };
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
