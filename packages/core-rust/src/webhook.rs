//! HMAC-SHA256 signatures for inbound messaging webhooks.
//!
//! The messaging provider signs each delivery with the app secret and sends
//! the hex digest in a header of the form `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix the provider puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the hex-encoded HMAC-SHA256 of `payload` (no prefix).
#[must_use]
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so keying cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a webhook signature header against `payload`.
///
/// Accepts the digest with or without the `sha256=` prefix. The digest
/// comparison is constant-time. Malformed hex and empty secrets are rejected.
#[must_use]
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }
    let digest = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature.trim());
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Compares a subscription verify token in constant time. An empty
/// expected token never matches.
#[must_use]
pub fn verify_token_matches(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}
