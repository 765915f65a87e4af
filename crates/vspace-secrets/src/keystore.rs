//! Origin-scoped persistence of the unlocked master secret.
//!
//! Two logical entries are kept per origin: [`MASTER_KEY_ENTRY`] and
//! [`SALT_ENTRY`]. A pair is only meaningful when both are present; any
//! partial or unparseable state loads as absent and forces re-entry of the
//! password.
//!
//! Backends:
//!   - [`FileKvStore`]: one JSON document per origin, flushed atomically
//!   - [`crate::keychain::KeychainKvStore`]: platform keychain
//!   - [`MemoryKvStore`]: process memory, also the fallback of every store

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use vspace_core::config::{expand_tilde, KeyStoreBackend, KeyStoreConfig};
use vspace_core::VspaceError;
use vspace_crypto::encoding::{array_to_base64url, base64url_to_array};
use vspace_crypto::primitives::sha256_hex;
use vspace_crypto::{DerivedMaster, MasterSecret, Salt};
use zeroize::Zeroizing;

use crate::keychain::KeychainKvStore;

/// Logical key of the raw 32-byte master secret
pub const MASTER_KEY_ENTRY: &str = "master_key";
/// Logical key of the 32-byte salt the master secret was derived with
pub const SALT_ENTRY: &str = "salt";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    #[error("key store quota exceeded")]
    QuotaExceeded,

    #[error("key store I/O: {0}")]
    Io(std::io::Error),

    #[error("key store document corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for KeyStoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::StorageFull {
            KeyStoreError::QuotaExceeded
        } else {
            KeyStoreError::Io(e)
        }
    }
}

impl From<KeyStoreError> for VspaceError {
    fn from(e: KeyStoreError) -> Self {
        VspaceError::KeyStore(e.to_string())
    }
}

/// Byte-valued key/value store scoped to one origin.
pub trait KvStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError>;

    /// Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), KeyStoreError>;
}

/// Process-memory store; contents are zeroized when dropped.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// JSON document per origin under a directory: `{ "<entry>": "<base64url>" }`.
///
/// Every mutation rewrites the document via temp file + rename so a crash
/// never leaves a half-written pair behind. On unix the file is created 0600.
pub struct FileKvStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(dir: &Path, origin: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", origin_file_stem(origin))),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_doc(&self) -> Result<BTreeMap<String, String>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = Zeroizing::new(std::fs::read_to_string(&self.path)?);
        serde_json::from_str(&content)
            .map_err(|e| KeyStoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn write_doc(&self, doc: &BTreeMap<String, String>) -> Result<(), KeyStoreError> {
        if doc.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = Zeroizing::new(
            serde_json::to_string_pretty(doc)
                .map_err(|e| KeyStoreError::Corrupt(format!("serializing document: {e}")))?,
        );

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("json.tmp");
        write_private(&tmp_path, json.as_bytes())?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let doc = self.read_doc()?;
        match doc.get(key) {
            Some(encoded) => {
                let bytes = base64url_to_array(encoded)
                    .map_err(|_| KeyStoreError::Corrupt(format!("entry {key} is not base64url")))?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.read_doc()?;
        doc.insert(key.to_string(), array_to_base64url(value));
        self.write_doc(&doc)
    }

    fn delete(&self, key: &str) -> Result<(), KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.read_doc()?;
        if doc.remove(key).is_some() {
            self.write_doc(&doc)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

/// Readable, collision-free file stem for an origin string.
fn origin_file_stem(origin: &str) -> String {
    let readable: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(48)
        .collect();
    let digest = sha256_hex(origin.as_bytes());
    format!("{readable}-{}", &digest[..16])
}

/// Master-secret persistence for one origin with an in-memory fallback.
///
/// Writes that fail on the primary backend are logged and kept in memory
/// for the rest of the process, so the session survives a broken keychain
/// or a full disk at the cost of re-entering the password next time.
pub struct KeyStore {
    primary: Box<dyn KvStore>,
    fallback: MemoryKvStore,
}

impl KeyStore {
    pub fn new(primary: Box<dyn KvStore>) -> Self {
        Self {
            primary,
            fallback: MemoryKvStore::new(),
        }
    }

    pub fn memory_only() -> Self {
        Self::new(Box::new(MemoryKvStore::new()))
    }

    /// Build the configured backend; an unusable keychain degrades to memory.
    pub fn from_config(config: &KeyStoreConfig) -> Self {
        match config.backend {
            KeyStoreBackend::File => Self::new(Box::new(FileKvStore::new(
                &expand_tilde(&config.dir),
                &config.origin,
            ))),
            KeyStoreBackend::Keychain => match KeychainKvStore::new(&config.origin) {
                Ok(store) => Self::new(Box::new(store)),
                Err(e) => {
                    tracing::warn!("platform keychain unavailable, keys will not persist: {e}");
                    Self::memory_only()
                }
            },
            KeyStoreBackend::Memory => Self::memory_only(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.primary.name()
    }

    /// Persist the master secret and its salt.
    ///
    /// Only fails if the in-memory fallback cannot take the pair either.
    pub fn store(&self, master: &MasterSecret, salt: &Salt) -> Result<(), KeyStoreError> {
        match write_pair(self.primary.as_ref(), master, salt) {
            Ok(()) => {
                clear_pair(&self.fallback)?;
                tracing::debug!(backend = self.primary.name(), "stored master secret");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    "key store write failed, keeping master secret in memory: {e}"
                );
                if let Err(e) = clear_pair(self.primary.as_ref()) {
                    tracing::warn!(
                        backend = self.primary.name(),
                        "could not remove stale entries, they will be ignored until restart: {e}"
                    );
                }
                write_pair(&self.fallback, master, salt)
            }
        }
    }

    /// The stored master secret and salt, or `None` when either is missing.
    ///
    /// The fallback only holds a pair written after the primary failed, so
    /// it is newer than anything left on the primary and is read first.
    pub fn load(&self) -> Result<Option<DerivedMaster>, KeyStoreError> {
        if let Some(pair) = read_pair(&self.fallback)? {
            return Ok(Some(pair));
        }
        match read_pair(self.primary.as_ref()) {
            Ok(pair) => Ok(pair),
            Err(e) => {
                tracing::warn!(backend = self.primary.name(), "key store read failed: {e}");
                Ok(None)
            }
        }
    }

    /// The cached salt alone, if any.
    pub fn load_salt(&self) -> Result<Option<Salt>, KeyStoreError> {
        if let Some(salt) = read_salt(&self.fallback)? {
            return Ok(Some(salt));
        }
        match read_salt(self.primary.as_ref()) {
            Ok(salt) => Ok(salt),
            Err(e) => {
                tracing::warn!(backend = self.primary.name(), "key store read failed: {e}");
                Ok(None)
            }
        }
    }

    /// Remove both entries from every backend.
    pub fn clear(&self) -> Result<(), KeyStoreError> {
        clear_pair(&self.fallback)?;
        clear_pair(self.primary.as_ref())?;
        tracing::debug!(backend = self.primary.name(), "cleared key store");
        Ok(())
    }
}

fn write_pair(store: &dyn KvStore, master: &MasterSecret, salt: &Salt) -> Result<(), KeyStoreError> {
    store.put(MASTER_KEY_ENTRY, master.as_bytes())?;
    store.put(SALT_ENTRY, salt.as_bytes())
}

fn clear_pair(store: &dyn KvStore) -> Result<(), KeyStoreError> {
    store.delete(MASTER_KEY_ENTRY)?;
    store.delete(SALT_ENTRY)
}

fn read_salt(store: &dyn KvStore) -> Result<Option<Salt>, KeyStoreError> {
    let Some(raw) = store.get(SALT_ENTRY)? else {
        return Ok(None);
    };
    match Salt::from_slice(&raw) {
        Ok(salt) => Ok(Some(salt)),
        Err(e) => {
            tracing::warn!(backend = store.name(), "ignoring stored salt: {e}");
            Ok(None)
        }
    }
}

fn read_pair(store: &dyn KvStore) -> Result<Option<DerivedMaster>, KeyStoreError> {
    let master = store.get(MASTER_KEY_ENTRY)?;
    let salt = read_salt(store)?;
    let (Some(raw), Some(salt)) = (master, salt) else {
        return Ok(None);
    };
    match MasterSecret::from_slice(&raw) {
        Ok(master) => Ok(Some(DerivedMaster { master, salt })),
        Err(e) => {
            tracing::warn!(backend = store.name(), "ignoring stored master secret: {e}");
            Ok(None)
        }
    }
}
