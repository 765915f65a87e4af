//! vspace-crypto: client-side key hierarchy for VaultSpace storage
//!
//! The storage service never sees plaintext names, content or keys. Every
//! secret that crosses the network is wrapped with AES-256-GCM and, when the
//! wrapping key is exportable, bound to it with an HMAC-SHA256 tag.
//!
//! Key hierarchy:
//! ```text
//! Password + Salt(32 bytes)
//!   └── Master Secret (256-bit)
//!       ├── primary: Argon2id (t=3, m=4096 KiB, p=4)
//!       ├── legacy:  PBKDF2-HMAC-SHA256 (600,000 iterations)
//!       │
//!       ├── Folder Key (HKDF-SHA256, salt=HKDF_SALT, info="folder:" || a/b/c)
//!       │   └── Folder name: AES-256-GCM, envelope = IV(12) || ciphertext
//!       └── User Key (same bytes, exportable handle)
//!           ├── Signing Key (HKDF-SHA256, salt=HKDF_SALT, info=KEY_SIGNATURE_INFO)
//!           └── VaultSpace Key (random 256-bit, wrapped)
//!               envelope = IV(12) || ciphertext || [HMAC tag(32)], base64url
//! ```

pub mod encoding;
pub mod envelope;
pub mod error;
pub mod folder;
pub mod kdf;
pub mod keys;
pub mod primitives;

pub use encoding::{array_to_base64url, base64url_to_array};
pub use envelope::{
    decrypt_vaultspace_key, derive_signing_key, encrypt_vaultspace_key, open_envelope,
    seal_envelope, unwrap_key, wrap_key, DecodeStrategy, EnvelopeFormat, Opened, SigningKey,
    Unwrapped,
};
pub use error::{CryptoError, CryptoResult};
pub use folder::{
    decrypt_folder_name, derive_folder_key, encrypt_folder_name, EncryptedFolderName, FolderKey,
    FolderKeyCache, FolderPath,
};
pub use kdf::{
    derive_from_password, derive_legacy_master, derive_user_key, derive_user_key_exportable,
    DerivedMaster, KdfProfile, MasterSecret, Salt,
};
pub use keys::{generate_vaultspace_key, ExportableKey, KeyHandle, OpaqueKey, UsableKey, VaultSpaceKey};

/// Size of every symmetric key in the hierarchy (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a per-user salt
pub const SALT_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag
pub const GCM_TAG_SIZE: usize = 16;

/// Size of an HMAC-SHA256 envelope signature
pub const HMAC_TAG_SIZE: usize = 32;

/// Fixed, non-secret HKDF salt shared by folder-key and signing-key
/// derivation. Purposes are separated by the HKDF `info` string. Changing it
/// orphans every folder name and signed envelope already persisted.
pub const HKDF_SALT: &[u8] = b"vaultspace-hkdf-salt-v1";
