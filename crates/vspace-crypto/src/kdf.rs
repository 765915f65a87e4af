//! Key derivation: password + salt → 256-bit master secret
//!
//! Two profiles exist and both are frozen for the lifetime of the data
//! format: changing a cost parameter changes every derived key and orphans
//! everything wrapped under them. A parameter change needs a versioned
//! migration, not a constant bump.

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::encoding::{decode_base64_any, encode_base64_standard};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{ExportableKey, OpaqueKey};
use crate::primitives::{derive_bits_argon2id, derive_bits_pbkdf2, random_bytes};
use crate::{KEY_SIZE, SALT_SIZE};

/// Argon2id time cost (iterations)
pub const ARGON2_TIME_COST: u32 = 3;
/// Argon2id memory cost in KiB
pub const ARGON2_MEMORY_KIB: u32 = 4096;
/// Argon2id lanes
pub const ARGON2_PARALLELISM: u32 = 4;
/// PBKDF2-HMAC-SHA256 iteration count for the legacy profile
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Well-known, non-secret password of the legacy degraded mode.
///
/// Combined with [`Salt::legacy_zero`] it lets independent clients derive the
/// same folder keys without a user credential. Anyone holding this crate can
/// do the same, so material under it is obfuscated, not protected.
pub const LEGACY_DEFAULT_PASSWORD: &str = "vaultspace-legacy-default-key";

/// A 256-bit master secret derived from a password.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterSecret {
    bytes: [u8; KEY_SIZE],
}

impl MasterSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            param: "master_secret",
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Key handle usable for wrap/unwrap and signing-key derivation.
    pub fn to_exportable(&self) -> ExportableKey {
        ExportableKey::from_bytes(self.bytes)
    }

    pub fn to_opaque(&self) -> OpaqueKey {
        OpaqueKey::from_bytes(self.bytes)
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Per-user salt. Not secret, but immutable once a master secret depends on it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Fresh random salt for a new account.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// The all-zero salt reserved for the legacy degraded mode.
    pub const fn legacy_zero() -> Self {
        Self([0u8; SALT_SIZE])
    }

    pub const fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            param: "salt",
            expected: SALT_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parse a salt as served by the backend (standard or url-safe base64).
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        Self::from_slice(&decode_base64_any("salt", encoded)?)
    }

    pub fn to_base64(&self) -> String {
        encode_base64_standard(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn is_legacy_zero(&self) -> bool {
        self.0 == [0u8; SALT_SIZE]
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// Password KDF profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfProfile {
    /// Argon2id, used for the account master key.
    Argon2id,
    /// PBKDF2-HMAC-SHA256, kept for local-only material of legacy sessions.
    Pbkdf2Legacy,
}

impl KdfProfile {
    pub fn derive(&self, password: &[u8], salt: &Salt) -> CryptoResult<MasterSecret> {
        let out = match self {
            KdfProfile::Argon2id => derive_bits_argon2id(
                password,
                salt.as_bytes(),
                ARGON2_TIME_COST,
                ARGON2_MEMORY_KIB,
                ARGON2_PARALLELISM,
                KEY_SIZE,
            )?,
            KdfProfile::Pbkdf2Legacy => {
                derive_bits_pbkdf2(password, salt.as_bytes(), PBKDF2_ITERATIONS, KEY_SIZE * 8)?
            }
        };
        MasterSecret::from_slice(&out)
    }
}

/// Master secret together with the salt it was derived from.
#[derive(Debug, Clone)]
pub struct DerivedMaster {
    pub master: MasterSecret,
    pub salt: Salt,
}

/// Derive a master secret from a password.
///
/// When `salt` is `None` a fresh random salt is generated; the caller must
/// persist it next to anything wrapped under the result.
pub fn derive_from_password(
    password: &SecretString,
    salt: Option<Salt>,
    profile: KdfProfile,
) -> CryptoResult<DerivedMaster> {
    let fresh_salt = salt.is_none();
    let salt = salt.unwrap_or_else(Salt::random);
    let master = profile.derive(password.expose_secret().as_bytes(), &salt)?;
    tracing::debug!(profile = ?profile, fresh_salt, "derived master secret");
    Ok(DerivedMaster { master, salt })
}

/// Degraded legacy mode: fixed password constant, all-zero salt, PBKDF2.
pub fn derive_legacy_master() -> CryptoResult<MasterSecret> {
    tracing::warn!("deriving legacy master secret from a well-known default; not confidential");
    KdfProfile::Pbkdf2Legacy.derive(LEGACY_DEFAULT_PASSWORD.as_bytes(), &Salt::legacy_zero())
}

/// Account user key as an opaque handle (encrypt/decrypt only).
pub fn derive_user_key(password: &SecretString, salt: &Salt) -> CryptoResult<OpaqueKey> {
    Ok(derive_from_password(password, Some(*salt), KdfProfile::Argon2id)?
        .master
        .to_opaque())
}

/// Account user key as an exportable handle, required for wrap/unwrap.
pub fn derive_user_key_exportable(
    password: &SecretString,
    salt: &Salt,
) -> CryptoResult<ExportableKey> {
    Ok(derive_from_password(password, Some(*salt), KdfProfile::Argon2id)?
        .master
        .to_exportable())
}
