//! Wrapped-key envelopes
//!
//! Wire format (base64url for transport):
//! ```text
//! IV(12) || AES-256-GCM ciphertext (incl. 16-byte GCM tag) || [HMAC-SHA256 tag(32)]
//! ```
//!
//! The trailing HMAC is present when the wrapping key was exportable at wrap
//! time. There is no version byte: on read, a buffer of at least
//! [`SIGNED_ENVELOPE_MIN`] bytes is first tried as signed, and anything that
//! does not verify is reread in full as unsigned. Persisted envelopes of both
//! shapes exist, so both decode strategies must stay.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encoding::{array_to_base64url, base64url_to_array};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{ExportableKey, UsableKey, VaultSpaceKey};
use crate::primitives::{aes_gcm_decrypt, aes_gcm_encrypt, derive_bits_hkdf, hmac_sign, hmac_verify, random_iv};
use crate::{GCM_TAG_SIZE, HKDF_SALT, HMAC_TAG_SIZE, IV_SIZE, KEY_SIZE};

/// HKDF info string of the envelope signing key.
pub const KEY_SIGNATURE_INFO: &[u8] = b"vaultspace-key-signature-v1";

/// Smallest buffer considered for the signed strategy: IV + a wrapped
/// 256-bit key with its GCM tag + the HMAC tag.
pub const SIGNED_ENVELOPE_MIN: usize = IV_SIZE + KEY_SIZE + GCM_TAG_SIZE + HMAC_TAG_SIZE;

/// HMAC key authenticating envelopes made under one wrapping key.
/// Recomputed on demand and never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: [u8; KEY_SIZE],
}

impl SigningKey {
    pub fn sign(&self, data: &[u8]) -> CryptoResult<[u8; HMAC_TAG_SIZE]> {
        hmac_sign(&self.bytes, data)
    }

    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        hmac_verify(&self.bytes, data, tag)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the envelope signing key from an exportable wrapping key.
pub fn derive_signing_key(wrapping: &ExportableKey) -> CryptoResult<SigningKey> {
    let okm = derive_bits_hkdf(wrapping.export(), HKDF_SALT, KEY_SIGNATURE_INFO, KEY_SIZE * 8)?;
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&okm);
    Ok(SigningKey { bytes })
}

fn signing_key_for(wrapping: &impl UsableKey) -> Option<SigningKey> {
    let exportable = wrapping.exportable()?;
    match derive_signing_key(exportable) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(error = %e, "signing key derivation failed");
            None
        }
    }
}

/// Shape of an envelope, as written or as recognized on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFormat {
    /// `IV || ciphertext || HMAC tag`
    Signed,
    /// `IV || ciphertext`
    Unsigned,
}

/// Decode strategies, tried in the order of [`DecodeStrategy::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Split off and verify a trailing 32-byte HMAC tag.
    SignedTrailingTag,
    /// Treat the entire buffer as `IV || ciphertext`.
    UnsignedLegacy,
}

impl DecodeStrategy {
    pub const ORDER: [DecodeStrategy; 2] =
        [DecodeStrategy::SignedTrailingTag, DecodeStrategy::UnsignedLegacy];

    /// The `IV || ciphertext` region this strategy accepts, if any.
    fn select<'a>(&self, raw: &'a [u8], signer: Option<&SigningKey>) -> Selection<'a> {
        match self {
            DecodeStrategy::SignedTrailingTag => {
                let Some(signer) = signer else {
                    return Selection::NotApplicable;
                };
                if raw.len() < SIGNED_ENVELOPE_MIN {
                    return Selection::NotApplicable;
                }
                let (body, tag) = raw.split_at(raw.len() - HMAC_TAG_SIZE);
                if signer.verify(body, tag) {
                    Selection::Accepted(body, EnvelopeFormat::Signed)
                } else {
                    Selection::TagRejected
                }
            }
            DecodeStrategy::UnsignedLegacy => Selection::Accepted(raw, EnvelopeFormat::Unsigned),
        }
    }
}

enum Selection<'a> {
    Accepted(&'a [u8], EnvelopeFormat),
    TagRejected,
    NotApplicable,
}

/// Decrypted envelope payload together with how it was decoded.
pub struct Opened {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub format: EnvelopeFormat,
    /// A plausible trailing tag was present but did not verify.
    pub tag_rejected: bool,
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opened")
            .field("plaintext", &"[REDACTED]")
            .field("format", &self.format)
            .field("tag_rejected", &self.tag_rejected)
            .finish()
    }
}

/// Unwrapped 256-bit key together with how its envelope was decoded.
#[derive(Debug)]
pub struct Unwrapped {
    pub key: ExportableKey,
    pub format: EnvelopeFormat,
    pub tag_rejected: bool,
}

/// Encrypt `plaintext` under `wrapping` and sign it when possible.
///
/// Returns the raw envelope bytes and the format actually produced. An
/// opaque wrapping key cannot yield a signing key, so the result degrades to
/// the unsigned format.
pub fn seal_envelope(
    wrapping: &impl UsableKey,
    plaintext: &[u8],
) -> CryptoResult<(Vec<u8>, EnvelopeFormat)> {
    let iv = random_iv();
    let ciphertext = aes_gcm_encrypt(wrapping.material().bytes(), &iv, plaintext)?;

    let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len() + HMAC_TAG_SIZE);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);

    let Some(signer) = signing_key_for(wrapping) else {
        tracing::warn!("wrapping key is not exportable; emitting unsigned envelope");
        return Ok((envelope, EnvelopeFormat::Unsigned));
    };
    let tag = signer.sign(&envelope)?;
    envelope.extend_from_slice(&tag);
    Ok((envelope, EnvelopeFormat::Signed))
}

/// Decode and decrypt a raw envelope under `wrapping`.
///
/// Strategies run in [`DecodeStrategy::ORDER`]; the first one that accepts
/// the buffer decides the region handed to AES-GCM. A tag that fails to
/// verify is tolerated (the buffer is reread as unsigned). A GCM
/// authentication failure is fatal and reported as [`CryptoError::Unwrap`].
pub fn open_envelope(wrapping: &impl UsableKey, raw: &[u8]) -> CryptoResult<Opened> {
    let signer = signing_key_for(wrapping);
    let mut tag_rejected = false;

    for strategy in DecodeStrategy::ORDER {
        let (body, format) = match strategy.select(raw, signer.as_ref()) {
            Selection::Accepted(body, format) => (body, format),
            Selection::TagRejected => {
                tag_rejected = true;
                continue;
            }
            Selection::NotApplicable => continue,
        };

        if body.len() < IV_SIZE + GCM_TAG_SIZE {
            return Err(CryptoError::TooShort {
                param: "envelope",
                minimum: IV_SIZE + GCM_TAG_SIZE,
                actual: body.len(),
            });
        }
        let (iv, ciphertext) = body.split_at(IV_SIZE);
        let plaintext = aes_gcm_decrypt(wrapping.material().bytes(), iv, ciphertext).map_err(
            |e| match e {
                CryptoError::Decrypt => CryptoError::Unwrap,
                other => other,
            },
        )?;

        if tag_rejected {
            tracing::debug!("envelope tag did not verify; decoded as unsigned legacy format");
        }
        return Ok(Opened {
            plaintext,
            format,
            tag_rejected,
        });
    }

    // UnsignedLegacy always accepts, so the loop returns before this point.
    Err(CryptoError::Unwrap)
}

/// Wrap `payload` under `wrapping`, returning a base64url envelope.
pub fn wrap_key(wrapping: &impl UsableKey, payload: &ExportableKey) -> CryptoResult<String> {
    let (envelope, _) = seal_envelope(wrapping, payload.export())?;
    Ok(array_to_base64url(&envelope))
}

/// Unwrap a base64url envelope produced by [`wrap_key`] (or an older
/// unsigned client) into an exportable key.
pub fn unwrap_key(wrapping: &impl UsableKey, envelope: &str) -> CryptoResult<Unwrapped> {
    let raw = base64url_to_array(envelope)?;
    let opened = open_envelope(wrapping, &raw)?;

    let bytes: [u8; KEY_SIZE] =
        opened
            .plaintext
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                param: "payload_key",
                expected: KEY_SIZE,
                actual: opened.plaintext.len(),
            })?;

    Ok(Unwrapped {
        key: ExportableKey::from_bytes(bytes),
        format: opened.format,
        tag_rejected: opened.tag_rejected,
    })
}

/// Wrap a VaultSpace key for the backend.
pub fn encrypt_vaultspace_key(
    wrapping: &impl UsableKey,
    vaultspace_key: &VaultSpaceKey,
) -> CryptoResult<String> {
    wrap_key(wrapping, vaultspace_key)
}

/// Recover a VaultSpace key from its backend envelope.
pub fn decrypt_vaultspace_key(wrapping: &impl UsableKey, envelope: &str) -> CryptoResult<VaultSpaceKey> {
    Ok(unwrap_key(wrapping, envelope)?.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_vaultspace_key, KeyHandle};
    use proptest::prelude::*;

    fn wrapping_key() -> ExportableKey {
        ExportableKey::from_bytes([0x42; KEY_SIZE])
    }

    /// Envelope as written by clients that predate signing.
    fn unsigned_envelope(wrapping: &ExportableKey, payload: &[u8]) -> Vec<u8> {
        seal_envelope(&wrapping.to_opaque(), payload).unwrap().0
    }

    #[test]
    fn test_signing_key_known_answer() {
        let signer = derive_signing_key(&wrapping_key()).unwrap();
        assert_eq!(
            hex::encode(signer.bytes),
            "4b22801b770ca0d1f6d9e9adbbd8823a8c0fab22df4872e96cb9cc7f3c48b8ce"
        );
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let wrapping = wrapping_key();
        let payload = generate_vaultspace_key();

        let envelope = wrap_key(&wrapping, &payload).unwrap();
        let unwrapped = unwrap_key(&wrapping, &envelope).unwrap();

        assert_eq!(unwrapped.key.export(), payload.export());
        assert_eq!(unwrapped.format, EnvelopeFormat::Signed);
        assert!(!unwrapped.tag_rejected);
    }

    #[test]
    fn test_signed_envelope_size() {
        let envelope = wrap_key(&wrapping_key(), &generate_vaultspace_key()).unwrap();
        let raw = base64url_to_array(&envelope).unwrap();

        // iv (12) + key (32) + gcm tag (16) + hmac (32) = 92
        assert_eq!(raw.len(), SIGNED_ENVELOPE_MIN);
        assert_eq!(raw.len(), 92);
        assert!(!envelope.contains('='), "base64url without padding");
    }

    #[test]
    fn test_opaque_wrapping_degrades_to_unsigned() {
        let wrapping = wrapping_key();
        let payload = generate_vaultspace_key();

        let (raw, format) = seal_envelope(&wrapping.to_opaque(), payload.export()).unwrap();
        assert_eq!(format, EnvelopeFormat::Unsigned);
        assert_eq!(raw.len(), IV_SIZE + KEY_SIZE + GCM_TAG_SIZE);

        let envelope = wrap_key(&KeyHandle::from(wrapping.to_opaque()), &payload).unwrap();
        let unwrapped = unwrap_key(&wrapping, &envelope).unwrap();
        assert_eq!(unwrapped.key.export(), payload.export());
        assert_eq!(unwrapped.format, EnvelopeFormat::Unsigned);
    }

    #[test]
    fn test_legacy_unsigned_envelope_unwraps() {
        let wrapping = wrapping_key();
        let payload = generate_vaultspace_key();
        let envelope = array_to_base64url(&unsigned_envelope(&wrapping, payload.export()));

        let unwrapped = unwrap_key(&wrapping, &envelope).unwrap();
        assert_eq!(unwrapped.key.export(), payload.export());
        assert_eq!(unwrapped.format, EnvelopeFormat::Unsigned);
        assert!(!unwrapped.tag_rejected, "too short to carry a tag");
    }

    #[test]
    fn test_long_unsigned_envelope_falls_back() {
        // 64-byte payload: the unsigned envelope is exactly 92 bytes and is
        // first mistaken for a signed one.
        let wrapping = wrapping_key();
        let payload = [0x5cu8; 64];
        let raw = unsigned_envelope(&wrapping, &payload);
        assert_eq!(raw.len(), SIGNED_ENVELOPE_MIN);

        let opened = open_envelope(&wrapping, &raw).unwrap();
        assert_eq!(&opened.plaintext[..], &payload[..]);
        assert_eq!(opened.format, EnvelopeFormat::Unsigned);
        assert!(opened.tag_rejected);

        let err = unwrap_key(&wrapping, &array_to_base64url(&raw)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidLength { param: "payload_key", .. }));
    }

    #[test]
    fn test_unwrap_wrong_key_fails() {
        let payload = generate_vaultspace_key();
        let envelope = wrap_key(&wrapping_key(), &payload).unwrap();

        let wrong = ExportableKey::from_bytes([0x43; KEY_SIZE]);
        assert_eq!(unwrap_key(&wrong, &envelope).unwrap_err(), CryptoError::Unwrap);
    }

    #[test]
    fn test_unwrap_with_opaque_key_reads_unsigned_only() {
        let wrapping = wrapping_key();
        let payload = generate_vaultspace_key();

        let unsigned = array_to_base64url(&unsigned_envelope(&wrapping, payload.export()));
        let unwrapped = unwrap_key(&wrapping.to_opaque(), &unsigned).unwrap();
        assert_eq!(unwrapped.key.export(), payload.export());

        // Signed envelopes need the exportable handle to strip the tag.
        let signed = wrap_key(&wrapping, &payload).unwrap();
        assert_eq!(unwrap_key(&wrapping.to_opaque(), &signed).unwrap_err(), CryptoError::Unwrap);
    }

    #[test]
    fn test_unwrap_garbage() {
        let wrapping = wrapping_key();
        assert!(matches!(
            unwrap_key(&wrapping, "***").unwrap_err(),
            CryptoError::Encoding { .. }
        ));
        assert!(matches!(
            unwrap_key(&wrapping, "AAAA").unwrap_err(),
            CryptoError::TooShort { param: "envelope", .. }
        ));
    }

    #[test]
    fn test_vaultspace_key_helpers() {
        let wrapping = wrapping_key();
        let vs_key = generate_vaultspace_key();
        let envelope = encrypt_vaultspace_key(&wrapping, &vs_key).unwrap();
        let recovered = decrypt_vaultspace_key(&wrapping, &envelope).unwrap();
        assert_eq!(recovered.export(), vs_key.export());
    }

    #[test]
    fn test_fresh_iv_per_wrap() {
        let wrapping = wrapping_key();
        let payload = generate_vaultspace_key();
        assert_ne!(
            wrap_key(&wrapping, &payload).unwrap(),
            wrap_key(&wrapping, &payload).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_any_flipped_byte_is_rejected(pos in 0usize..SIGNED_ENVELOPE_MIN, flip in 1u8..=255) {
            let wrapping = wrapping_key();
            let payload = generate_vaultspace_key();
            let mut raw = base64url_to_array(&wrap_key(&wrapping, &payload).unwrap()).unwrap();
            raw[pos] ^= flip;

            prop_assert!(unwrap_key(&wrapping, &array_to_base64url(&raw)).is_err());
        }

        #[test]
        fn prop_cross_key_isolation(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            let payload = generate_vaultspace_key();
            let envelope = wrap_key(&ExportableKey::from_bytes(a), &payload).unwrap();
            prop_assert!(unwrap_key(&ExportableKey::from_bytes(b), &envelope).is_err());
        }
    }
}
