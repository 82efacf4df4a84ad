//! Pluggable serialization. The cache core never assumes a wire format; it calls
//! through this trait so the format used to turn caller values into byte arrays can
//! be swapped without touching [`crate::memory::MemoryTier`] or
//! [`crate::disk::store::DiskStore`], both of which are byte-oriented.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;

/// Converts caller values to and from bytes for disk persistence.
pub trait Codec: Send + Sync {
    /// Encodes `value` to bytes. Failure is always a programmer error (an
    /// unserializable type reached the cache).
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError>;

    /// Decodes bytes previously produced by [`Codec::encode`]. Failure is always a
    /// programmer error (corrupt bytes or a type mismatch at the call site).
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError>;
}

/// Default codec, backed by `serde_json`. Readable on disk, which is convenient for
/// inspecting `diskcache.sqlite` rows by hand during development.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::EncodeFailed(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_and_struct_values() {
        let codec = JsonCodec;

        let bytes = codec.encode(&"hello".to_string()).unwrap();
        let value: String = codec.decode(&bytes).unwrap();
        assert_eq!(value, "hello");

        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
            y: i32,
        }
        let p = Point { x: 3, y: -4 };
        let bytes = codec.encode(&p).unwrap();
        let decoded: Point = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn decode_reports_failure_on_garbage_bytes() {
        let codec = JsonCodec;
        let result: Result<String, _> = codec.decode(b"\xff\xff not json");
        assert!(result.is_err());
    }
}
