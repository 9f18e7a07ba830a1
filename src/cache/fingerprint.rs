//! Content fingerprints and cache key derivation.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the content.
pub fn fingerprint(content: &str) -> String {
    fingerprint_bytes(content.as_bytes())
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Key for a result entry: a hash of the target and its content fingerprint.
pub fn result_key(target: &str, content_fingerprint: &str) -> String {
    namespaced_key("result", target, content_fingerprint)
}

/// Key for a transformation entry: a hash of the transformation kind and
/// the source fingerprint.
pub fn transformation_key(kind: &str, source_fingerprint: &str) -> String {
    namespaced_key("transform", kind, source_fingerprint)
}

fn namespaced_key(namespace: &str, name: &str, content_fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(content_fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}
