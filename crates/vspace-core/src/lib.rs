pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{AccountBackend, BackendError};
pub use error::{VspaceError, VspaceResult};
pub use types::{PasswordUpdate, VaultSpaceId, WrappedKeyRecord};
