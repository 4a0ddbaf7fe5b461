//! Key Mapping Module
//!
//! Maps arbitrary serializable keys onto filesystem-safe entry file names.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// File extension of every entry file under a cache root
pub const ENTRY_EXTENSION: &str = "cache";

/// Length of the hex digest part of an entry file name
pub const DIGEST_HEX_LEN: usize = 64;

// == Key Segment ==
/// Returns the entry file name for `key`.
///
/// The key is converted to a `serde_json::Value` first, which orders map
/// entries by key, then serialized and hashed with SHA-256. The result does
/// not depend on a map's iteration order: it is stable across restarts and
/// contains only lowercase hex digits plus the extension. Keys with equal
/// JSON values share a slot.
pub fn key_segment<K>(key: &K) -> Result<String>
where
    K: Serialize + ?Sized,
{
    let normalized = serde_json::to_value(key)
        .map_err(|e| CacheError::Encode(format!("cache key: {e}")))?;
    let encoded = serde_json::to_vec(&normalized)
        .map_err(|e| CacheError::Encode(format!("cache key: {e}")))?;

    let digest = Sha256::digest(&encoded);
    Ok(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
}

/// Returns true if `file_name` has the shape produced by [`key_segment`].
pub fn is_entry_file_name(file_name: &str) -> bool {
    match file_name.strip_suffix(ENTRY_EXTENSION) {
        Some(stem) => match stem.strip_suffix('.') {
            Some(digest) => {
                digest.len() == DIGEST_HEX_LEN
                    && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            None => false,
        },
        None => false,
    }
}
