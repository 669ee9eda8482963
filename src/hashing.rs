//! Hashing - SHA-256 digests
//!
//! Used to fingerprint encoded permit images and to tag store revisions.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Revision tag of a persisted snapshot blob. An absent blob has a fixed tag.
pub fn snapshot_revision(blob: Option<&str>) -> String {
    match blob {
        Some(text) => sha256_hex(text.as_bytes()),
        None => sha256_hex(b""),
    }
}
