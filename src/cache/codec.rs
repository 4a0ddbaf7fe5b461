//! Value Codec Module
//!
//! Turns cached values into bytes and back.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Codec Trait ==
/// Encodes and decodes cached values.
///
/// The codec only sees the value payload; entry metadata is written by the
/// store in its own fixed header.
pub trait Codec: Send + Sync {
    /// Serializes `value` into bytes.
    fn encode<V>(&self, value: &V) -> Result<Vec<u8>>
    where
        V: Serialize + ?Sized;

    /// Deserializes a value from `bytes`.
    fn decode<V>(&self, bytes: &[u8]) -> Result<V>
    where
        V: DeserializeOwned;
}

// == JSON Codec ==
/// Default codec backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<V>(&self, value: &V) -> Result<Vec<u8>>
    where
        V: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode<V>(&self, bytes: &[u8]) -> Result<V>
    where
        V: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
    }
}
