//! Folder key hierarchy and folder-name encryption
//!
//! A folder key is never stored: it is recomputed from the master secret and
//! the folder's root-to-leaf path of identifiers. The storage root itself is
//! not part of the path, so a top-level folder `f1` has path `["f1"]`.
//!
//! Folder names use randomized AES-GCM (unlike file-content keys, nothing
//! needs deterministic ciphertext). A SHA-256 hex digest of the plaintext is
//! returned alongside so the server can answer exact-match searches.

use std::collections::HashMap;
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterSecret;
use crate::primitives::{aes_gcm_decrypt, aes_gcm_encrypt, derive_bits_hkdf, random_iv, sha256_hex};
use crate::{encoding, GCM_TAG_SIZE, HKDF_SALT, IV_SIZE, KEY_SIZE};

/// Domain tag prefixed to the path in the HKDF info string.
pub const FOLDER_INFO_PREFIX: &str = "folder:";

/// Ordered folder identifiers from the first level below root to the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderPath(Vec<String>);

impl FolderPath {
    /// Build a path from its segments.
    ///
    /// Segments are joined with `/` for derivation, so an empty segment or one
    /// containing `/` would alias another path and is rejected.
    pub fn new<I, S>(segments: I) -> CryptoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CryptoError::Unsupported {
                param: "folder_path",
                reason: "path must name at least one folder below the root".into(),
            });
        }
        if segments.iter().any(|s| s.is_empty() || s.contains('/')) {
            return Err(CryptoError::Unsupported {
                param: "folder_path",
                reason: "segments must be non-empty and must not contain '/'".into(),
            });
        }
        Ok(Self(segments))
    }

    /// Parse a `/`-separated path such as `f1/f2`. Outer slashes are ignored.
    pub fn parse(path: &str) -> CryptoResult<Self> {
        Self::new(path.trim_matches('/').split('/'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Child path one level below this one.
    pub fn child(&self, id: impl Into<String>) -> CryptoResult<Self> {
        let mut segments = self.0.clone();
        segments.push(id.into());
        Self::new(segments)
    }

    /// True when `self` equals `ancestor` or lies below it.
    pub fn is_within(&self, ancestor: &FolderPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// HKDF info string: `folder:` followed by the joined path.
    pub fn info(&self) -> String {
        format!("{FOLDER_INFO_PREFIX}{}", self.0.join("/"))
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A per-folder 256-bit key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FolderKey {
    bytes: [u8; KEY_SIZE],
}

impl FolderKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the key of the folder at `path` via HKDF-SHA256.
pub fn derive_folder_key(master: &MasterSecret, path: &FolderPath) -> CryptoResult<FolderKey> {
    let okm = derive_bits_hkdf(
        master.as_bytes(),
        HKDF_SALT,
        path.info().as_bytes(),
        KEY_SIZE * 8,
    )?;
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&okm);
    Ok(FolderKey::from_bytes(bytes))
}

/// Folder name ready to hand to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFolderName {
    /// `IV(12) || ciphertext || GCM tag(16)`
    pub envelope: Vec<u8>,
    /// Lowercase hex SHA-256 of the plaintext name
    pub name_hash: String,
}

impl EncryptedFolderName {
    pub fn envelope_base64url(&self) -> String {
        encoding::array_to_base64url(&self.envelope)
    }
}

/// Hash used for server-side exact-match lookup of a folder name.
pub fn folder_name_hash(name: &str) -> String {
    sha256_hex(name.as_bytes())
}

/// Encrypt a folder name under its folder key with a fresh random IV.
pub fn encrypt_folder_name(name: &str, key: &FolderKey) -> CryptoResult<EncryptedFolderName> {
    let iv = random_iv();
    let ciphertext = aes_gcm_encrypt(key.as_bytes(), &iv, name.as_bytes())?;

    let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);

    Ok(EncryptedFolderName {
        envelope,
        name_hash: folder_name_hash(name),
    })
}

/// Decrypt a folder-name envelope.
///
/// A wrong key and tampered data are indistinguishable and both surface as
/// [`CryptoError::Decrypt`]; callers render a placeholder instead.
pub fn decrypt_folder_name(envelope: &[u8], key: &FolderKey) -> CryptoResult<String> {
    if envelope.len() < IV_SIZE + GCM_TAG_SIZE {
        return Err(CryptoError::TooShort {
            param: "envelope",
            minimum: IV_SIZE + GCM_TAG_SIZE,
            actual: envelope.len(),
        });
    }
    let (iv, ciphertext) = envelope.split_at(IV_SIZE);
    let plaintext = aes_gcm_decrypt(key.as_bytes(), iv, ciphertext)?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Decrypt)
}

/// Per-path folder key cache for UI responsiveness.
///
/// Entries are only valid for the master secret they were derived from; the
/// owner must call [`FolderKeyCache::clear`] whenever that secret changes.
#[derive(Debug, Default)]
pub struct FolderKeyCache {
    entries: HashMap<FolderPath, FolderKey>,
}

impl FolderKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached key for `path`, deriving and inserting it on a miss.
    pub fn get_or_derive(
        &mut self,
        master: &MasterSecret,
        path: &FolderPath,
    ) -> CryptoResult<FolderKey> {
        if let Some(key) = self.entries.get(path) {
            return Ok(key.clone());
        }
        let key = derive_folder_key(master, path)?;
        self.entries.insert(path.clone(), key.clone());
        Ok(key)
    }

    /// Drop `prefix` and every cached descendant (folder moved or renamed).
    pub fn invalidate_subtree(&mut self, prefix: &FolderPath) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.is_within(prefix));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
