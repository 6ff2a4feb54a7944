//! Codec trait and implementations for packing values into bytes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The layers above don't care HOW a record is packed, they only need
//! something that implements [`Codec`]:
//!
//! - [`MsgpackCodec`] is the protocol's wire format. Records are
//!   map-encoded (field names as keys), so optional fields can be left out
//!   without breaking field order, and byte strings use the native `bin`
//!   type.
//! - [`JsonCodec`] is for debugging and text-only channels. Byte strings
//!   become `{"__bytes__": "<base64>"}` maps.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` so a codec can live inside long-lived async
/// tasks and be shared across Tokio's worker threads.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails, e.g. a
    /// `Value::Native` that no registered type claimed.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// MsgpackCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses MessagePack (via `rmp-serde`).
///
/// ```rust
/// use vmp_protocol::{Codec, MsgpackCodec, Message};
///
/// let codec = MsgpackCodec;
/// let message = Message::new("PING").with_ts(1000);
///
/// let bytes = codec.encode(&message).unwrap();
/// let decoded: Message = codec.decode(&bytes).unwrap();
/// assert_eq!(message, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        // `to_vec_named` writes structs as maps keyed by field name. Plain
        // `to_vec` would write them as positional arrays.
        rmp_serde::to_vec_named(value).map_err(|err| ProtocolError::Encode(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        rmp_serde::from_slice(data).map_err(|err| ProtocolError::Decode(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Handy when you want to read messages in a log or browser DevTools. It
/// is behind the `json` feature flag (enabled by default).
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(|err| ProtocolError::Encode(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(|err| ProtocolError::Decode(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

/// Encodes bytes as standard-alphabet base64, padded, no line breaks.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard-alphabet base64.
///
/// # Errors
/// `ProtocolError::Decode` for characters outside the alphabet or bad
/// padding.
pub fn from_base64(text: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(text.trim())
        .map_err(|err| ProtocolError::Decode(format!("invalid base64: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, Value};

    #[test]
    fn test_msgpack_encodes_records_as_maps() {
        let bytes = MsgpackCodec.encode(&Message::new("E").with_ts(1)).unwrap();
        // fixmap with 2 entries: ts, etype
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn test_msgpack_decode_truncated_fails() {
        let bytes = MsgpackCodec.encode(&Value::from("hello world")).unwrap();
        let err = MsgpackCodec
            .decode::<Value>(&bytes[..bytes.len() - 3])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_msgpack_encode_unclaimed_native_fails() {
        let err = MsgpackCodec.encode(&Value::native(1u8)).unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(_)));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_round_trips_binary() {
        let value: Value = [("b", Value::Binary(vec![0, 255]))].into_iter().collect();
        let bytes = JsonCodec.encode(&value).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"b":{"__bytes__":"AP8="}}"#);
        assert_eq!(JsonCodec.decode::<Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_base64_round_trip() {
        assert_eq!(to_base64(&[1, 2, 3]), "AQID");
        assert_eq!(from_base64("AQID").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_from_base64_rejects_garbage() {
        assert!(matches!(from_base64("not base64!"), Err(ProtocolError::Decode(_))));
    }
}
