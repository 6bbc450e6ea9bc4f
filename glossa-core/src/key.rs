//! Key fingerprints.
//!
//! The cache treats keys as opaque strings. These helpers give producers a
//! stable way to build them: one digest per source, one suffix per mode, so
//! every variant of a source shares a substring that pattern invalidation can
//! target.

use sha2::{Digest, Sha256};

/// Number of SHA-256 bytes kept in a source digest.
const DIGEST_BYTES: usize = 16;

/// Hex digest identifying a source (e.g. a track URI).
pub fn source_digest(source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..DIGEST_BYTES])
}

/// Cache key for one `mode` of a source, e.g. a target language or
/// romanization style.
pub fn fingerprint(source_id: &str, mode: &str) -> String {
    format!("{}:{}", source_digest(source_id), mode)
}
