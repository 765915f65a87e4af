use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VspaceError, VspaceResult};

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VspaceConfig {
    pub api: ApiConfig,
    pub keystore: KeyStoreConfig,
    pub policy: PolicyConfig,
    pub folders: FolderConfig,
    pub logging: LoggingConfig,
}

impl VspaceConfig {
    /// Parse a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> VspaceResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VspaceError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST collaborator
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    /// JSON document per origin on local disk
    File,
    /// Platform keychain (Keychain Services, Secret Service, Credential Manager)
    Keychain,
    /// Process memory only; lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Durable backend used as the primary store
    pub backend: KeyStoreBackend,
    /// Origin scope: entries of different origins never see each other
    pub origin: String,
    /// Directory for the file backend
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum length (in characters) of a new account password
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderKeySource {
    /// Folder keys hang off the session's Argon2id master secret
    Account,
    /// Folder keys hang off the fixed, non-secret legacy derivation
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// Root secret used for folder-key derivation
    pub key_source: FolderKeySource,
    /// Cache derived folder keys per path for the session lifetime
    pub cache: bool,
    /// Label rendered when a folder name cannot be decrypted
    pub placeholder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            backend: KeyStoreBackend::File,
            origin: "default".into(),
            dir: PathBuf::from("~/.local/share/vspace/keystore"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_password_length: 12,
        }
    }
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            key_source: FolderKeySource::Account,
            cache: true,
            placeholder: "[encrypted]".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
