//! Response store key generation.

use sha2::{Digest, Sha256};

use crate::http::Method;

/// Compute the store key for a cached response.
///
/// The method is part of the key so that GET and HEAD variants of the same
/// URL are stored (and purged) independently.
pub fn response_key(method: &Method, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
