//! Base64 codecs shared by every envelope and salt on the wire.
//!
//! Envelopes are emitted as unpadded base64url. Decoding accepts padded and
//! unpadded input, since older clients padded their output.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::error::{CryptoError, CryptoResult};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Encode bytes as unpadded base64url.
pub fn array_to_base64url(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decode base64url (padding optional).
pub fn base64url_to_array(encoded: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE
        .decode(encoded.trim())
        .map_err(|_| CryptoError::Encoding { param: "envelope" })
}

/// Decode a value that may be either standard or url-safe base64.
///
/// Alphabets are tried in order: standard, then url-safe. Values using only
/// the shared alphabet decode identically under both.
pub fn decode_base64_any(param: &'static str, encoded: &str) -> CryptoResult<Vec<u8>> {
    let encoded = encoded.trim();
    [STANDARD, URL_SAFE]
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .ok_or(CryptoError::Encoding { param })
}

/// Encode with the standard alphabet (salts are exchanged in this form).
pub fn encode_base64_standard(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
