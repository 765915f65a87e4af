//! Typed symmetric key handles.
//!
//! An [`OpaqueKey`] can encrypt, decrypt and sign but its bytes can never be
//! read back out. An [`ExportableKey`] additionally exposes its raw bytes,
//! which is required for wrapping it under another key and for deriving an
//! envelope signing key from it. Conversion only goes one way
//! (exportable → opaque).

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::primitives::random_bytes;
use crate::KEY_SIZE;

mod sealed {
    pub trait Sealed {}
}

/// Borrowed key bytes, readable only inside this crate.
pub struct KeyMaterial<'a>(&'a [u8; KEY_SIZE]);

impl KeyMaterial<'_> {
    pub(crate) fn bytes(&self) -> &[u8; KEY_SIZE] {
        self.0
    }
}

/// Any key handle that can drive AES-GCM or HMAC operations.
pub trait UsableKey: sealed::Sealed {
    /// The exportable view of this key, if it permits export.
    fn exportable(&self) -> Option<&ExportableKey>;

    #[doc(hidden)]
    fn material(&self) -> KeyMaterial<'_>;
}

/// A 256-bit key whose raw bytes cannot be exported.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OpaqueKey {
    bytes: [u8; KEY_SIZE],
}

impl OpaqueKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

impl std::fmt::Debug for OpaqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpaqueKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// A 256-bit key whose raw bytes may be exported.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExportableKey {
    bytes: [u8; KEY_SIZE],
}

impl ExportableKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes. Callers must not persist these unwrapped.
    pub fn export(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Drop the export capability.
    pub fn to_opaque(&self) -> OpaqueKey {
        OpaqueKey::from_bytes(self.bytes)
    }
}

impl std::fmt::Debug for ExportableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportableKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Either kind of key, for callers that hold whatever the session gave them.
#[derive(Debug, Clone)]
pub enum KeyHandle {
    Opaque(OpaqueKey),
    Exportable(ExportableKey),
}

impl From<OpaqueKey> for KeyHandle {
    fn from(key: OpaqueKey) -> Self {
        KeyHandle::Opaque(key)
    }
}

impl From<ExportableKey> for KeyHandle {
    fn from(key: ExportableKey) -> Self {
        KeyHandle::Exportable(key)
    }
}

impl sealed::Sealed for OpaqueKey {}
impl sealed::Sealed for ExportableKey {}
impl sealed::Sealed for KeyHandle {}

impl UsableKey for OpaqueKey {
    fn exportable(&self) -> Option<&ExportableKey> {
        None
    }

    fn material(&self) -> KeyMaterial<'_> {
        KeyMaterial(&self.bytes)
    }
}

impl UsableKey for ExportableKey {
    fn exportable(&self) -> Option<&ExportableKey> {
        Some(self)
    }

    fn material(&self) -> KeyMaterial<'_> {
        KeyMaterial(&self.bytes)
    }
}

impl UsableKey for KeyHandle {
    fn exportable(&self) -> Option<&ExportableKey> {
        match self {
            KeyHandle::Opaque(_) => None,
            KeyHandle::Exportable(key) => Some(key),
        }
    }

    fn material(&self) -> KeyMaterial<'_> {
        match self {
            KeyHandle::Opaque(key) => key.material(),
            KeyHandle::Exportable(key) => key.material(),
        }
    }
}

/// Content key of a single VaultSpace. Always persisted wrapped.
pub type VaultSpaceKey = ExportableKey;

/// Generate a random 256-bit VaultSpace key.
pub fn generate_vaultspace_key() -> VaultSpaceKey {
    ExportableKey::from_bytes(random_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vaultspace_key_generation() {
        let k1 = generate_vaultspace_key();
        let k2 = generate_vaultspace_key();
        assert_ne!(k1.export(), k2.export(), "random keys must differ");
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = ExportableKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?} {:?} {:?}", key.to_opaque(), KeyHandle::from(key.clone()));
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"), "no byte values in debug output");
    }

    #[test]
    fn test_handle_exportability() {
        let exportable = ExportableKey::from_bytes([1u8; KEY_SIZE]);
        let opaque = exportable.to_opaque();

        assert!(KeyHandle::from(exportable.clone()).exportable().is_some());
        assert!(KeyHandle::from(opaque.clone()).exportable().is_none());
        assert!(opaque.exportable().is_none());
    }

    #[test]
    fn test_opaque_shares_material() {
        let exportable = ExportableKey::from_bytes([9u8; KEY_SIZE]);
        let opaque = exportable.to_opaque();
        assert_eq!(opaque.material().bytes(), exportable.export());
    }
}
