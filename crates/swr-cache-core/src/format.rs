//! Payload encoding for stored values
//!
//! The engine converts application values to and from the payload bytes
//! inside the stored envelope with one [`PayloadFormat`], picked once per
//! engine in its configuration. JSON is the default because the envelope has
//! to stay readable across processes and languages; the binary formats trade
//! that for size and speed.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CacheError, Result};

/// Encoding applied to values before they enter the stored envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// JSON: human-readable, widely compatible (default)
    #[default]
    Json,
    /// MessagePack: compact binary, enable with the `msgpack` feature
    #[cfg(feature = "msgpack")]
    MsgPack,
    /// Bincode: fastest and smallest, Rust-only; enable with the `bincode`
    /// feature
    #[cfg(feature = "bincode")]
    Bincode,
}

impl PayloadFormat {
    /// Format name (for debugging/metrics)
    pub fn name(&self) -> &'static str {
        match self {
            PayloadFormat::Json => "json",
            #[cfg(feature = "msgpack")]
            PayloadFormat::MsgPack => "msgpack",
            #[cfg(feature = "bincode")]
            PayloadFormat::Bincode => "bincode",
        }
    }

    /// Encode a value to payload bytes
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            PayloadFormat::Json => {
                serde_json::to_vec(value).map_err(|e| CacheError::encoding(self.name(), e))
            }
            #[cfg(feature = "msgpack")]
            PayloadFormat::MsgPack => {
                rmp_serde::to_vec(value).map_err(|e| CacheError::encoding(self.name(), e))
            }
            #[cfg(feature = "bincode")]
            PayloadFormat::Bincode => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map_err(|e| CacheError::encoding(self.name(), e))
            }
        }
    }

    /// Decode payload bytes back into a value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            PayloadFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| CacheError::decoding(self.name(), e))
            }
            #[cfg(feature = "msgpack")]
            PayloadFormat::MsgPack => {
                rmp_serde::from_slice(bytes).map_err(|e| CacheError::decoding(self.name(), e))
            }
            #[cfg(feature = "bincode")]
            PayloadFormat::Bincode => {
                bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                    .map(|(value, _len)| value)
                    .map_err(|e| CacheError::decoding(self.name(), e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct TestStruct {
        name: String,
        value: i32,
    }

    fn sample() -> TestStruct {
        TestStruct {
            name: "test".to_string(),
            value: 42,
        }
    }

    #[test]
    fn test_json_round_trip() {
        let bytes = PayloadFormat::Json.encode(&sample()).unwrap();
        let decoded: TestStruct = PayloadFormat::Json.decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_decode_garbage_fails_with_format_tag() {
        let result: Result<i32> = PayloadFormat::Json.decode(b"not json");
        match result {
            Err(CacheError::Deserialization(msg)) => assert!(msg.starts_with("json:")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_default_is_json() {
        assert_eq!(PayloadFormat::default(), PayloadFormat::Json);
        assert_eq!(PayloadFormat::default().name(), "json");
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn test_msgpack_round_trip() {
        let bytes = PayloadFormat::MsgPack.encode(&sample()).unwrap();
        let decoded: TestStruct = PayloadFormat::MsgPack.decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn test_bincode_round_trip() {
        let bytes = PayloadFormat::Bincode.encode(&sample()).unwrap();
        let decoded: TestStruct = PayloadFormat::Bincode.decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }
}
