//! The unlocked session context.
//!
//! A [`Session`] owns the current master secret, the per-path folder key
//! cache and the [`KeyStore`] it persists to. Every operation that needs key
//! material goes through it, so replacing the master (unlock, rotation,
//! logout) invalidates everything derived from the previous one in one place.

use secrecy::SecretString;
use thiserror::Error;
use vspace_core::config::{FolderConfig, FolderKeySource};
use vspace_core::VspaceError;
use vspace_crypto::{
    decrypt_folder_name, derive_folder_key, derive_from_password, derive_legacy_master,
    encrypt_folder_name, generate_vaultspace_key, unwrap_key, wrap_key, CryptoError,
    EncryptedFolderName, ExportableKey, FolderKey, FolderKeyCache, FolderPath, KdfProfile,
    MasterSecret, Salt, Unwrapped, VaultSpaceKey,
};

use crate::keystore::{KeyStore, KeyStoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is locked")]
    Locked,

    #[error("session is in legacy mode and has no account key")]
    LegacyMode,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl From<SessionError> for VspaceError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Crypto(e) => VspaceError::Crypto(e.to_string()),
            SessionError::KeyStore(e) => e.into(),
            other => VspaceError::Crypto(other.to_string()),
        }
    }
}

/// How the active master secret was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Argon2id over the account password and the per-user salt
    Account,
    /// Fixed legacy derivation; no user credential involved
    Legacy,
}

struct ActiveMaster {
    master: MasterSecret,
    salt: Salt,
    mode: SessionMode,
}

pub struct Session {
    keystore: KeyStore,
    key_source: FolderKeySource,
    cache_enabled: bool,
    placeholder: String,
    active: Option<ActiveMaster>,
    legacy_master: Option<MasterSecret>,
    folder_keys: FolderKeyCache,
}

impl Session {
    pub fn new(keystore: KeyStore, folders: &FolderConfig) -> Self {
        Self {
            keystore,
            key_source: folders.key_source,
            cache_enabled: folders.cache,
            placeholder: folders.placeholder.clone(),
            active: None,
            legacy_master: None,
            folder_keys: FolderKeyCache::new(),
        }
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub fn is_unlocked(&self) -> bool {
        self.active.is_some()
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.active.as_ref().map(|a| a.mode)
    }

    /// Salt of the active account master.
    pub fn salt(&self) -> Option<Salt> {
        self.active
            .as_ref()
            .filter(|a| a.mode == SessionMode::Account)
            .map(|a| a.salt)
    }

    /// Salt known locally, from the active session or the key store.
    pub fn cached_salt(&self) -> Option<Salt> {
        if let Some(salt) = self.salt() {
            return Some(salt);
        }
        match self.keystore.load_salt() {
            Ok(salt) => salt,
            Err(e) => {
                tracing::warn!("reading cached salt: {e}");
                None
            }
        }
    }

    pub fn folder_key_source(&self) -> FolderKeySource {
        self.key_source
    }

    /// Derive the account master from `password` and persist it.
    ///
    /// With no `salt` a fresh one is generated (new account); the caller
    /// must upload it. Returns the salt in use.
    pub fn unlock(
        &mut self,
        password: &SecretString,
        salt: Option<Salt>,
    ) -> Result<Salt, SessionError> {
        let derived = derive_from_password(password, salt, KdfProfile::Argon2id)?;
        let salt = derived.salt;
        self.install(derived.master, salt, SessionMode::Account);
        if let Err(e) = self.keystore.store(self.active_master()?, &salt) {
            tracing::warn!("unlocked session will not survive a restart: {e}");
        }
        tracing::info!(backend = self.keystore.backend_name(), "session unlocked");
        Ok(salt)
    }

    /// Enter the degraded legacy mode. Nothing is persisted: the master is
    /// recomputable by anyone.
    pub fn unlock_legacy(&mut self) -> Result<(), SessionError> {
        let master = self.legacy_master()?.clone();
        self.install(master, Salt::legacy_zero(), SessionMode::Legacy);
        Ok(())
    }

    /// Restore a previously stored account master. Returns `false` when the
    /// key store holds no complete pair.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        match self.keystore.load()? {
            Some(stored) => {
                self.install(stored.master, stored.salt, SessionMode::Account);
                tracing::debug!(backend = self.keystore.backend_name(), "session resumed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Swap in a new account master, e.g. after a password change.
    ///
    /// The in-memory session always switches and the new pair is always
    /// written, even when the old entries could not be removed. The returned
    /// error is the first key store failure.
    pub fn replace_master(&mut self, master: MasterSecret, salt: Salt) -> Result<(), SessionError> {
        self.install(master, salt, SessionMode::Account);
        let cleared = self.keystore.clear();
        if let Err(e) = &cleared {
            tracing::warn!("could not clear previous master secret: {e}");
        }
        self.keystore.store(self.active_master()?, &salt)?;
        Ok(cleared?)
    }

    /// Forget the master secret and everything derived from it.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.active = None;
        self.folder_keys.clear();
        self.keystore.clear()?;
        tracing::info!("session locked");
        Ok(())
    }

    /// Exportable user key for VaultSpace key wrapping.
    pub fn user_key(&self) -> Result<ExportableKey, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::Locked)?;
        match active.mode {
            SessionMode::Account => Ok(active.master.to_exportable()),
            SessionMode::Legacy => Err(SessionError::LegacyMode),
        }
    }

    pub fn folder_key(&mut self, path: &FolderPath) -> Result<FolderKey, SessionError> {
        if self.key_source == FolderKeySource::Legacy {
            self.legacy_master()?;
        }
        let root = match self.key_source {
            FolderKeySource::Account => self.active.as_ref().map(|a| &a.master),
            FolderKeySource::Legacy => self.legacy_master.as_ref(),
        }
        .ok_or(SessionError::Locked)?;

        if self.cache_enabled {
            Ok(self.folder_keys.get_or_derive(root, path)?)
        } else {
            Ok(derive_folder_key(root, path)?)
        }
    }

    /// Drop cached keys for a moved or renamed folder and its descendants.
    pub fn invalidate_folder(&mut self, path: &FolderPath) -> usize {
        self.folder_keys.invalidate_subtree(path)
    }

    pub fn encrypt_folder_name(
        &mut self,
        path: &FolderPath,
        name: &str,
    ) -> Result<EncryptedFolderName, SessionError> {
        let key = self.folder_key(path)?;
        Ok(encrypt_folder_name(name, &key)?)
    }

    pub fn decrypt_folder_name(
        &mut self,
        path: &FolderPath,
        envelope: &[u8],
    ) -> Result<String, SessionError> {
        let key = self.folder_key(path)?;
        Ok(decrypt_folder_name(envelope, &key)?)
    }

    /// Name to render for a folder; the configured placeholder when the
    /// name cannot be decrypted.
    pub fn display_folder_name(&mut self, path: &FolderPath, envelope: &[u8]) -> String {
        match self.decrypt_folder_name(path, envelope) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(path = %path, "folder name unavailable: {e}");
                self.placeholder.clone()
            }
        }
    }

    /// Generate a fresh VaultSpace key and its envelope under the user key.
    pub fn create_vaultspace_key(&self) -> Result<(VaultSpaceKey, String), SessionError> {
        let key = generate_vaultspace_key();
        let envelope = self.wrap_vaultspace_key(&key)?;
        Ok((key, envelope))
    }

    pub fn wrap_vaultspace_key(&self, key: &VaultSpaceKey) -> Result<String, SessionError> {
        Ok(wrap_key(&self.user_key()?, key)?)
    }

    pub fn unwrap_vaultspace_key(&self, envelope: &str) -> Result<Unwrapped, SessionError> {
        Ok(unwrap_key(&self.user_key()?, envelope)?)
    }

    fn install(&mut self, master: MasterSecret, salt: Salt, mode: SessionMode) {
        self.folder_keys.clear();
        self.active = Some(ActiveMaster { master, salt, mode });
    }

    fn active_master(&self) -> Result<&MasterSecret, SessionError> {
        self.active
            .as_ref()
            .map(|a| &a.master)
            .ok_or(SessionError::Locked)
    }

    fn legacy_master(&mut self) -> Result<&MasterSecret, SessionError> {
        if self.legacy_master.is_none() {
            self.legacy_master = Some(derive_legacy_master()?);
        }
        self.legacy_master.as_ref().ok_or(SessionError::Locked)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.keystore.backend_name())
            .field("mode", &self.mode())
            .field("key_source", &self.key_source)
            .field("cached_folder_keys", &self.folder_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::test_support::StickyKvStore;
    use crate::keystore::FileKvStore;
    use vspace_crypto::EnvelopeFormat;

    fn account_session() -> Session {
        Session::new(KeyStore::memory_only(), &FolderConfig::default())
    }

    fn legacy_session() -> Session {
        let folders = FolderConfig {
            key_source: FolderKeySource::Legacy,
            ..Default::default()
        };
        Session::new(KeyStore::memory_only(), &folders)
    }

    fn path(p: &str) -> FolderPath {
        FolderPath::parse(p).unwrap()
    }

    #[test]
    fn test_locked_session_refuses_key_operations() {
        let mut session = account_session();

        assert!(!session.is_unlocked());
        assert!(matches!(session.user_key(), Err(SessionError::Locked)));
        assert!(matches!(session.folder_key(&path("a")), Err(SessionError::Locked)));
        assert!(matches!(session.unwrap_vaultspace_key("AAAA"), Err(SessionError::Locked)));
    }

    #[test]
    fn test_unlock_and_resume_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let password = SecretString::from("correct horse battery staple");

        let mut first = Session::new(
            KeyStore::new(Box::new(FileKvStore::new(dir.path(), "default"))),
            &FolderConfig::default(),
        );
        let salt = first.unlock(&password, None).unwrap();
        let (_, envelope) = first.create_vaultspace_key().unwrap();

        let mut second = Session::new(
            KeyStore::new(Box::new(FileKvStore::new(dir.path(), "default"))),
            &FolderConfig::default(),
        );
        assert!(second.resume().unwrap());
        assert_eq!(second.salt(), Some(salt));
        assert_eq!(second.mode(), Some(SessionMode::Account));

        let unwrapped = second.unwrap_vaultspace_key(&envelope).unwrap();
        assert_eq!(unwrapped.format, EnvelopeFormat::Signed);
    }

    #[test]
    fn test_resume_with_empty_store() {
        let mut session = account_session();
        assert!(!session.resume().unwrap());
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_folder_name_roundtrip_and_placeholder() {
        let mut session = account_session();
        session
            .unlock(&SecretString::from("folder password"), Some(Salt::from_bytes([3; 32])))
            .unwrap();

        let encrypted = session.encrypt_folder_name(&path("f1/f2"), "Taxes 2024").unwrap();
        assert_eq!(
            session.decrypt_folder_name(&path("f1/f2"), &encrypted.envelope).unwrap(),
            "Taxes 2024"
        );

        // Ciphertext moved under another parent no longer decrypts
        assert_eq!(
            session.display_folder_name(&path("f1/f3"), &encrypted.envelope),
            "[encrypted]"
        );
        assert_eq!(session.display_folder_name(&path("f1/f2"), b"short"), "[encrypted]");
    }

    #[test]
    fn test_folder_keys_are_cached_and_invalidated() {
        let mut session = account_session();
        session.unlock_legacy().unwrap();

        session.folder_key(&path("a")).unwrap();
        session.folder_key(&path("a/b")).unwrap();
        session.folder_key(&path("c")).unwrap();
        assert_eq!(session.folder_keys.len(), 3);

        assert_eq!(session.invalidate_folder(&path("a")), 2);
        assert_eq!(session.folder_keys.len(), 1);
    }

    #[test]
    fn test_cache_disabled() {
        let folders = FolderConfig {
            cache: false,
            ..Default::default()
        };
        let mut session = Session::new(KeyStore::memory_only(), &folders);
        session.unlock_legacy().unwrap();

        let a = session.folder_key(&path("a")).unwrap();
        let again = session.folder_key(&path("a")).unwrap();
        assert_eq!(a.as_bytes(), again.as_bytes());
        assert!(session.folder_keys.is_empty());
    }

    #[test]
    fn test_legacy_mode_has_no_user_key() {
        let mut session = account_session();
        session.unlock_legacy().unwrap();

        assert_eq!(session.mode(), Some(SessionMode::Legacy));
        assert_eq!(session.salt(), None);
        assert!(matches!(session.user_key(), Err(SessionError::LegacyMode)));
        assert!(session.keystore().load().unwrap().is_none());
    }

    #[test]
    fn test_legacy_folder_keys_shared_across_clients() {
        let mut alice = legacy_session();
        let mut bob = legacy_session();

        let key = alice.folder_key(&path("shared")).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "77f21d9c31325c862c5a2b92c08ea402556b63e2fed840fb1fbded4973fd08c1"
        );
        assert_eq!(bob.folder_key(&path("shared")).unwrap().as_bytes(), key.as_bytes());

        let encrypted = alice.encrypt_folder_name(&path("shared"), "Team Docs").unwrap();
        assert_eq!(
            bob.decrypt_folder_name(&path("shared"), &encrypted.envelope).unwrap(),
            "Team Docs"
        );
    }

    #[test]
    fn test_legacy_key_source_ignores_account_master() {
        let mut session = legacy_session();
        let before = session.folder_key(&path("shared")).unwrap();

        session
            .unlock(&SecretString::from("account password"), Some(Salt::from_bytes([9; 32])))
            .unwrap();
        let after = session.folder_key(&path("shared")).unwrap();

        assert_eq!(before.as_bytes(), after.as_bytes());
    }

    #[test]
    fn test_replace_master_switches_keys() {
        let mut session = account_session();
        let salt = session
            .unlock(&SecretString::from("old password"), None)
            .unwrap();
        let (payload, envelope) = session.create_vaultspace_key().unwrap();
        session.folder_key(&path("a")).unwrap();

        session
            .replace_master(MasterSecret::from_bytes([0x42; 32]), salt)
            .unwrap();

        assert!(session.folder_keys.is_empty());
        assert!(session.unwrap_vaultspace_key(&envelope).is_err());
        let stored = session.keystore().load().unwrap().unwrap();
        assert_eq!(stored.master.as_bytes(), &[0x42; 32]);

        let rewrapped = session.wrap_vaultspace_key(&payload).unwrap();
        assert_eq!(
            session.unwrap_vaultspace_key(&rewrapped).unwrap().key.export(),
            payload.export()
        );
    }

    #[test]
    fn test_replace_master_persists_when_clear_fails() {
        let sticky = StickyKvStore::default();
        let mut session = Session::new(
            KeyStore::new(Box::new(sticky.clone())),
            &FolderConfig::default(),
        );
        let salt = session
            .unlock(&SecretString::from("old password"), None)
            .unwrap();

        let result = session.replace_master(MasterSecret::from_bytes([0x42; 32]), salt);
        assert!(matches!(result, Err(SessionError::KeyStore(_))));

        let mut restarted =
            Session::new(KeyStore::new(Box::new(sticky)), &FolderConfig::default());
        assert!(restarted.resume().unwrap());
        assert_eq!(
            restarted.keystore().load().unwrap().unwrap().master.as_bytes(),
            &[0x42; 32]
        );
    }

    #[test]
    fn test_logout_clears_everything() {
        let mut session = account_session();
        session
            .unlock(&SecretString::from("some password"), None)
            .unwrap();
        session.folder_key(&path("a")).unwrap();

        session.logout().unwrap();

        assert!(!session.is_unlocked());
        assert!(session.folder_keys.is_empty());
        assert!(session.keystore().load().unwrap().is_none());
        assert_eq!(session.cached_salt(), None);
    }

    #[test]
    fn test_debug_does_not_leak() {
        let mut session = account_session();
        session.unlock_legacy().unwrap();
        let debug = format!("{session:?}");
        assert!(debug.contains("Legacy"));
        assert!(!debug.contains("master"));
    }
}
