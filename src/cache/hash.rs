//! Content hashing for structure versions.
//!
//! A pre-aggregation's structure version is a hash of its definition and its
//! cube's source SQL. Changing either yields a new version, which names a new
//! table instead of reusing one built for a different shape.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of a short content hash used in table names.
pub const SHORT_HASH_LEN: usize = 8;

/// SHA256 of the JSON form of `value`, as 64 lowercase hex characters.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// First [`SHORT_HASH_LEN`] characters of [`compute_hash`].
pub fn short_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut hash = compute_hash(value)?;
    hash.truncate(SHORT_HASH_LEN);
    Ok(hash)
}
