//! Wire envelope of backfill task bodies
//!
//! The worker receives the JSON task unit as base64 text. The HMAC-SHA256 of
//! that text travels hex-encoded in [`SIGNATURE_HEADER`], so the worker can
//! authenticate the exact bytes it was handed before decoding them.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of the wire text
pub const SIGNATURE_HEADER: &str = "X-Lens-Signature";

/// A task body ready to hand to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBody {
    /// Base64 text of the JSON payload, exactly as the worker receives it
    pub wire: String,
    /// Hex HMAC-SHA256 of `wire`
    pub signature: String,
}

impl SignedBody {
    /// Encode a JSON payload for the wire and sign the encoded text
    pub fn seal(payload: &[u8], secret: &str) -> Result<Self> {
        let wire = STANDARD.encode(payload);
        let mut mac = keyed(secret)?;
        mac.update(wire.as_bytes());
        Ok(Self {
            signature: hex::encode(mac.finalize().into_bytes()),
            wire,
        })
    }

    /// Authenticate delivered wire text and return the JSON payload it carries
    pub fn open(wire: &[u8], signature: &str, secret: &str) -> Result<Vec<u8>> {
        let tag = hex::decode(signature)
            .map_err(|_| Error::Auth("task signature is not hex".into()))?;
        let mut mac = keyed(secret)?;
        mac.update(wire);
        mac.verify_slice(&tag)
            .map_err(|_| Error::Auth("task signature mismatch".into()))?;
        STANDARD
            .decode(wire)
            .map_err(|e| Error::Internal(format!("task body is not base64: {e}")))
    }
}

fn keyed(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Configuration("Invalid HMAC secret".into()))
}
