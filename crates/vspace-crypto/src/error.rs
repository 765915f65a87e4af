use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the key hierarchy.
///
/// Messages name the offending parameter but never carry key bytes, IVs or
/// tags.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid length for `{param}`: expected {expected} bytes, got {actual}")]
    InvalidLength {
        param: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("`{param}` too short: {actual} bytes (minimum {minimum})")]
    TooShort {
        param: &'static str,
        minimum: usize,
        actual: usize,
    },

    #[error("unsupported `{param}`: {reason}")]
    Unsupported { param: &'static str, reason: String },

    #[error("`{param}` is not valid base64")]
    Encoding { param: &'static str },

    #[error("cannot decrypt: wrong key or corrupted data")]
    Decrypt,

    #[error("cannot unwrap key: wrong key or corrupted data")]
    Unwrap,
}
