//! Platform keychain backend for the key store.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! Each origin gets its own service name (`vspace:<origin>`); values are
//! stored as base64url strings.

use vspace_crypto::encoding::{array_to_base64url, base64url_to_array};
use zeroize::{Zeroize, Zeroizing};

use crate::keystore::{KeyStoreError, KvStore};

const SERVICE_PREFIX: &str = "vspace";

/// Key store backend on the platform keychain, scoped to one origin.
pub struct KeychainKvStore {
    service: String,
}

impl KeychainKvStore {
    /// Fails when no platform keychain is reachable.
    pub fn new(origin: &str) -> Result<Self, KeyStoreError> {
        let service = format!("{SERVICE_PREFIX}:{origin}");
        keyring::Entry::new(&service, "__vspace_probe__").map_err(map_keyring_error)?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, key).map_err(map_keyring_error)
    }
}

impl KvStore for KeychainKvStore {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        match self.entry(key)?.get_password() {
            Ok(mut encoded) => {
                let decoded = base64url_to_array(&encoded);
                encoded.zeroize();
                let bytes = decoded
                    .map_err(|_| KeyStoreError::Corrupt(format!("keychain entry {key} is not base64url")))?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let encoded = Zeroizing::new(array_to_base64url(value));
        self.entry(key)?
            .set_password(&encoded)
            .map_err(map_keyring_error)?;
        tracing::debug!(service = %self.service, key, "stored entry in platform keychain");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(service = %self.service, key, "deleted entry from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()), // already deleted
            Err(e) => Err(map_keyring_error(e)),
        }
    }
}

fn map_keyring_error(e: keyring::Error) -> KeyStoreError {
    match e {
        keyring::Error::TooLong(..) => KeyStoreError::QuotaExceeded,
        other => KeyStoreError::Unavailable(other.to_string()),
    }
}
