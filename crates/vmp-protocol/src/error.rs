//! Error types for the protocol layer.
//!
//! Everything that can go wrong between an application value and a byte
//! buffer lands in [`ProtocolError`]. RPC failures (timeouts, cancellation,
//! remote errors) live one layer up in `vmp-rpc`, so when you see a
//! `ProtocolError` you know the problem is in encoding or decoding.

/// Errors that can occur in the protocol layer.
///
/// The variants follow the retry taxonomy of the protocol: an
/// [`UnknownTypeTag`](Self::UnknownTypeTag) means the two peers disagree on
/// their registries and retrying will never help, while a
/// [`Decode`](Self::Decode) error usually points at a truncated or corrupted
/// buffer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// A value could not be packed into bytes.
    ///
    /// The most common cause is an application value (`Value::Native`) that
    /// no registered type claimed, so it reached the packer un-encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be unpacked: malformed input, a truncated buffer,
    /// bad base64, or a record with the wrong shape.
    #[error("decode failed: {0}")]
    Decode(String),

    /// An encoded value carries a `ztype` with no registered decoder.
    ///
    /// This is never silently skipped. An unrecognized tag on the wire
    /// means version skew or a registry mismatch between the peers.
    #[error("unknown type tag: {0}")]
    UnknownTypeTag(String),

    /// An encoded value has a known tag but its fields don't fit it,
    /// e.g. a `Float32Array` whose byte length isn't a multiple of 4.
    #[error("malformed {type_tag} value: {reason}")]
    MalformedEncodedValue {
        /// The tag whose decoder rejected the value.
        type_tag: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The message decoded fine but violates protocol rules, e.g. an RPC
    /// request without its `rtype` correlation id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Shorthand for building a [`MalformedEncodedValue`](Self::MalformedEncodedValue).
    pub fn malformed(type_tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEncodedValue {
            type_tag: type_tag.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means the peers speak incompatible
    /// dialects of the protocol (different registries).
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::UnknownTypeTag(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_tag_names_the_tag() {
        let err = ProtocolError::UnknownTypeTag("nonexistent.Type".into());
        assert_eq!(err.to_string(), "unknown type tag: nonexistent.Type");
        assert!(err.is_protocol_mismatch());
    }

    #[test]
    fn test_malformed_display() {
        let err = ProtocolError::malformed("Float32Array", "missing binary");
        assert_eq!(err.to_string(), "malformed Float32Array value: missing binary");
        assert!(!err.is_protocol_mismatch());
    }
}
