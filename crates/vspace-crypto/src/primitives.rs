//! Thin, stateless wrappers over the RustCrypto primitives.
//!
//! Everything here works on raw byte slices and validates lengths up front so
//! that failures name the parameter at fault. Higher layers never call the
//! underlying crates directly.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::{GCM_TAG_SIZE, HMAC_TAG_SIZE, IV_SIZE, KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Minimum salt length accepted by Argon2.
const ARGON2_MIN_SALT: usize = 8;

/// Fill an array from the OS-seeded CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Fresh random AES-GCM IV.
pub fn random_iv() -> [u8; IV_SIZE] {
    random_bytes()
}

fn output_len(output_bits: usize) -> CryptoResult<usize> {
    if output_bits == 0 || output_bits % 8 != 0 {
        return Err(CryptoError::Unsupported {
            param: "output_bits",
            reason: format!("{output_bits} is not a positive multiple of 8"),
        });
    }
    Ok(output_bits / 8)
}

/// PBKDF2-HMAC-SHA256.
pub fn derive_bits_pbkdf2(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    output_bits: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if iterations == 0 {
        return Err(CryptoError::Unsupported {
            param: "iterations",
            reason: "must be non-zero".into(),
        });
    }
    let mut out = Zeroizing::new(vec![0u8; output_len(output_bits)?]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// HKDF-SHA256 (extract + expand).
pub fn derive_bits_hkdf(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    output_bits: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; output_len(output_bits)?]);
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut out)
        .map_err(|_| CryptoError::Unsupported {
            param: "output_bits",
            reason: format!("{output_bits} exceeds the HKDF-SHA256 output limit"),
        })?;
    Ok(out)
}

/// Argon2id (version 0x13).
pub fn derive_bits_argon2id(
    password: &[u8],
    salt: &[u8],
    time_cost: u32,
    memory_kib: u32,
    parallelism: u32,
    output_bytes: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if salt.len() < ARGON2_MIN_SALT {
        return Err(CryptoError::TooShort {
            param: "salt",
            minimum: ARGON2_MIN_SALT,
            actual: salt.len(),
        });
    }
    let params = Params::new(memory_kib, time_cost, parallelism, Some(output_bytes)).map_err(
        |e| CryptoError::Unsupported {
            param: "argon2_params",
            reason: e.to_string(),
        },
    )?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new(vec![0u8; output_bytes]);
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| CryptoError::Unsupported {
            param: "argon2",
            reason: e.to_string(),
        })?;
    Ok(out)
}

fn check_key(key: &[u8]) -> CryptoResult<()> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidLength {
            param: "key",
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(())
}

fn check_iv(iv: &[u8]) -> CryptoResult<()> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidLength {
            param: "iv",
            expected: IV_SIZE,
            actual: iv.len(),
        });
    }
    Ok(())
}

fn cipher(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    check_key(key)?;
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
        param: "key",
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

/// AES-256-GCM encrypt. Output is `ciphertext || 16-byte tag`.
pub fn aes_gcm_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    check_iv(iv)?;
    cipher(key)?
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::Unsupported {
            param: "plaintext",
            reason: "exceeds AES-GCM message limit".into(),
        })
}

/// AES-256-GCM decrypt. Tag mismatch is reported as [`CryptoError::Decrypt`].
pub fn aes_gcm_decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    check_iv(iv)?;
    if ciphertext.len() < GCM_TAG_SIZE {
        return Err(CryptoError::TooShort {
            param: "ciphertext",
            minimum: GCM_TAG_SIZE,
            actual: ciphertext.len(),
        });
    }
    cipher(key)?
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt)
}

/// HMAC-SHA256 tag over `data`.
pub fn hmac_sign(key: &[u8], data: &[u8]) -> CryptoResult<[u8; HMAC_TAG_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| {
        CryptoError::Unsupported {
            param: "hmac_key",
            reason: e.to_string(),
        }
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC-SHA256 verification.
pub fn hmac_verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
