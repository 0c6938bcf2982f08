//! HMAC-SHA256 request signatures for the reconfiguration webhook.
//!
//! The caller sends `base64(HMAC-SHA256(secret, raw body))` in the
//! [`SIGNATURE_HEADER`] header. Comparison is constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Why a signed request was refused.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature")]
    Missing,

    #[error("signature is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("signature does not match")]
    Mismatch,
}

/// Result of a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The signature matched the configured secret.
    Verified,
    /// No secret is configured, so nothing was checked.
    Unverified,
}

/// Checks webhook signatures against an optional shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enforced", &self.is_enforced())
            .finish()
    }
}

impl SignatureVerifier {
    /// An empty secret counts as no secret.
    #[must_use]
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|secret| !secret.is_empty())
                .map(|secret| secret.as_bytes().to_vec()),
        }
    }

    /// Whether requests must carry a valid signature.
    #[must_use]
    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    /// Check `signature` (the raw header value) against `body`.
    ///
    /// # Errors
    ///
    /// With a secret configured, fails when the signature is missing, not
    /// base64, or does not match.
    pub fn verify(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Verification, SignatureError> {
        let Some(secret) = &self.secret else {
            return Ok(Verification::Unverified);
        };
        let signature = signature.ok_or(SignatureError::Missing)?;
        let expected = STANDARD.decode(signature.trim())?;

        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)?;
        Ok(Verification::Verified)
    }
}

/// Compute the header value for `body` signed with `secret`.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}
