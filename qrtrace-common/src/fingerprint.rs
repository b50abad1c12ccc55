//! Payload fingerprinting
//!
//! The fingerprint is the deduplication key for QR payloads: SHA-256 over the
//! exact payload bytes, rendered as lowercase hex. It is a pure function of
//! the payload and is never stored anywhere except the `qr_codes` row that
//! owns it.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest length
pub const FINGERPRINT_LEN: usize = 64;

/// Compute the content fingerprint for a decoded QR payload
pub fn fingerprint(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
