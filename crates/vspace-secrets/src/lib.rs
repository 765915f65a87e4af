//! vspace-secrets: where unlocked key material lives and how it changes
//!
//! - [`keystore`]: origin-scoped persistence of the master secret and salt,
//!   falling back to process memory when the durable backend fails
//! - [`keychain`]: platform keychain backend for the key store
//! - [`session`]: the unlocked context every folder and VaultSpace-key
//!   operation goes through
//! - [`rotate`]: password change with all-or-nothing re-wrapping of every
//!   VaultSpace key

pub mod keychain;
pub mod keystore;
pub mod rotate;
pub mod session;

pub use keychain::KeychainKvStore;
pub use keystore::{FileKvStore, KeyStore, KeyStoreError, KvStore, MemoryKvStore};
pub use rotate::{
    PasswordChangeRequest, PasswordPolicy, RotationCoordinator, RotationError, RotationReport,
    RotationState,
};
pub use session::{Session, SessionError, SessionMode};
