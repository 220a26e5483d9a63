//! Versioned value encoding.
//!
//! Every cached value travels inside an envelope naming its schema and
//! version. A reader only accepts envelopes matching its own type's
//! constants, so entries written by an incompatible build are ignored
//! instead of being misread.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{CacheError, CacheResult};

/// A type that may be stored in the object cache.
pub trait Cacheable: Serialize + DeserializeOwned {
    /// Stable name of the stored type.
    const SCHEMA: &'static str;
    /// Bump on any change that alters the encoded shape.
    const VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema: &'a str,
    version: u32,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    schema: String,
    version: u32,
    payload: serde_json::Value,
}

pub fn encode<T: Cacheable>(value: &T) -> CacheResult<Vec<u8>> {
    serde_json::to_vec(&EnvelopeRef {
        schema: T::SCHEMA,
        version: T::VERSION,
        payload: value,
    })
    .map_err(|e| CacheError::Serialization(e.to_string()))
}

pub fn decode<T: Cacheable>(bytes: &[u8]) -> CacheResult<T> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;

    if envelope.schema != T::SCHEMA || envelope.version != T::VERSION {
        return Err(CacheError::Serialization(format!(
            "expected {} v{}, found {} v{}",
            T::SCHEMA,
            T::VERSION,
            envelope.schema,
            envelope.version
        )));
    }

    serde_json::from_value(envelope.payload).map_err(|e| CacheError::Serialization(e.to_string()))
}
