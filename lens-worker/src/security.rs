//! HMAC-SHA256 verification of queue-delivered task bodies
//!
//! Comparison is constant-time.

use hex::FromHex;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of the raw request body
pub const SIGNATURE_HEADER: &str = "x-lens-signature";

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Invalid signature format: {0}")]
    InvalidFormat(String),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Missing signature header")]
    MissingSignature,
}

/// Verify the hex signature of `payload`
pub fn verify_signature(
    payload: &[u8],
    signature_hex: &str,
    secret: &str,
) -> Result<(), SecurityError> {
    let signature = <Vec<u8>>::from_hex(signature_hex.trim()).map_err(|e| {
        SecurityError::InvalidFormat(format!("Failed to decode hex signature: {e}"))
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SecurityError::VerificationFailed)?;
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(&signature[..]).into() {
        Ok(())
    } else {
        Err(SecurityError::VerificationFailed)
    }
}

pub fn extract_signature(signature_header: Option<&str>) -> Result<&str, SecurityError> {
    signature_header
        .filter(|s| !s.trim().is_empty())
        .ok_or(SecurityError::MissingSignature)
}
