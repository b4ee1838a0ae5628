//! GitHub webhook signature verification.
//!
//! GitHub signs webhook deliveries using HMAC-SHA256 over the raw request body
//! and sends the digest in the `X-Hub-Signature-256` header as `sha256=<hex>`.
//! Reference: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm prefix accepted in the signature header.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

/// Length in bytes of an HMAC-SHA256 digest.
pub const DIGEST_LEN: usize = 32;

/// Reasons a signature header cannot be checked at all.
///
/// These are distinct from a well-formed signature that simply does not
/// match, which [`verify_signature`] reports as `Ok(false)`.
#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("signature header has no '=' separator")]
    MissingSeparator,

    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("signature digest is empty")]
    EmptyDigest,

    #[error("signature digest is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("signature digest is {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("secret cannot be used as an HMAC key")]
    InvalidKey,
}

/// Shared webhook secret used as the HMAC key.
///
/// The value is never printed; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw key bytes, for HMAC computation only.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<REDACTED>)")
    }
}

/// Parse a `sha256=<hex>` header value into raw digest bytes.
///
/// The header is split on the first `=` only. Hex digits may be upper or
/// lower case.
pub fn parse_signature_header(header_value: &str) -> Result<Vec<u8>, SignatureError> {
    let (algorithm, digest_hex) = header_value
        .split_once('=')
        .ok_or(SignatureError::MissingSeparator)?;

    if algorithm != SIGNATURE_ALGORITHM {
        return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    if digest_hex.is_empty() {
        return Err(SignatureError::EmptyDigest);
    }

    let digest = hex::decode(digest_hex)?;
    if digest.len() != DIGEST_LEN {
        return Err(SignatureError::InvalidLength {
            expected: DIGEST_LEN,
            actual: digest.len(),
        });
    }

    Ok(digest)
}

/// Verify a GitHub webhook signature over the raw request body.
///
/// # Arguments
///
/// * `secret` - The webhook secret shared with the sender
/// * `header_value` - The `X-Hub-Signature-256` header value
/// * `raw_body` - The request body exactly as received
///
/// # Returns
///
/// `Ok(true)` if the digest matches, `Ok(false)` if it does not, and an
/// error if the header is malformed or the key cannot be used.
pub fn verify_signature(
    secret: &[u8],
    header_value: &str,
    raw_body: &[u8],
) -> Result<bool, SignatureError> {
    let expected = parse_signature_header(header_value)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(raw_body);

    // verify_slice checks lengths first and compares in constant time
    Ok(mac.verify_slice(&expected).is_ok())
}

/// Verifier bound to the process-wide webhook secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Secret,
}

impl SignatureVerifier {
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }

    /// Verify `header_value` against `raw_body` with the configured secret.
    pub fn verify(&self, header_value: &str, raw_body: &[u8]) -> Result<bool, SignatureError> {
        verify_signature(self.secret.expose(), header_value, raw_body)
    }
}

/// Compute the `sha256=<hex>` header value a sender would attach to `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(format!(
        "{}={}",
        SIGNATURE_ALGORITHM,
        hex::encode(mac.finalize().into_bytes())
    ))
}
