//! The wire serializer: tree codec plus byte codec in one call.
//!
//! ```text
//! serialize:   Value ──encode_tree──→ wire-ready Value ──Codec::encode──→ bytes
//! deserialize: bytes ──Codec::decode──→ wire Value ──decode_tree──→ Value
//! ```
//!
//! The free functions at the bottom use the global registry and
//! MessagePack, which is what most callers want.

use crate::codec::{Codec, MsgpackCodec, from_base64, to_base64};
use crate::tree::TreeCodec;
use crate::types::WireMessage;
use crate::{ProtocolError, Value};

/// A [`TreeCodec`] bound to a byte [`Codec`].
///
/// ```rust
/// use vmp_protocol::{Value, WireCodec};
///
/// let wire: WireCodec = WireCodec::default();
/// let value: Value = [("vertices", Value::native(vec![1.0f32, 2.0, 3.0]))]
///     .into_iter()
///     .collect();
///
/// let bytes = wire.serialize(&value).unwrap();
/// let back = wire.deserialize(&bytes).unwrap();
/// let vertices = back.get("vertices").and_then(Value::as_native::<Vec<f32>>);
/// assert_eq!(vertices, Some(&vec![1.0, 2.0, 3.0]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WireCodec<C: Codec = MsgpackCodec> {
    tree: TreeCodec,
    codec: C,
}

impl<C: Codec> WireCodec<C> {
    pub fn new(tree: TreeCodec, codec: C) -> Self {
        Self { tree, codec }
    }

    pub fn tree(&self) -> &TreeCodec {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut TreeCodec {
        &mut self.tree
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Encodes a value tree and packs it.
    ///
    /// # Errors
    /// Whatever a registered encoder returns, or `ProtocolError::Encode`
    /// if the packer rejects the tree.
    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
        let wire = self.tree.encode_tree(value)?;
        self.codec.encode(&wire)
    }

    /// Unpacks bytes and decodes the value tree.
    ///
    /// # Errors
    /// `ProtocolError::Decode` for bad bytes, `UnknownTypeTag` for an
    /// envelope nothing is registered for.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<Value, ProtocolError> {
        let wire: Value = self.codec.decode(bytes)?;
        self.tree.decode_tree(&wire).inspect_err(|err| {
            tracing::debug!(%err, len = bytes.len(), "value decode failed");
        })
    }

    pub fn serialize_to_base64(&self, value: &Value) -> Result<String, ProtocolError> {
        self.serialize(value).map(|bytes| to_base64(&bytes))
    }

    pub fn deserialize_from_base64(&self, text: &str) -> Result<Value, ProtocolError> {
        self.deserialize(&from_base64(text)?)
    }

    /// Runs the tree codec's encode direction over a message's payloads.
    pub fn encode_payloads<M: WireMessage>(&self, message: &mut M) -> Result<(), ProtocolError> {
        let payloads = message.payloads_mut();
        for slot in payloads.values {
            *slot = self.tree.encode_tree(slot)?;
        }
        for items in payloads.sequences {
            for item in items.iter_mut() {
                *item = self.tree.encode_tree(item)?;
            }
        }
        for map in payloads.mappings {
            *map = self.tree.encode_entries(map)?;
        }
        Ok(())
    }

    /// Runs the tree codec's decode direction over a message's payloads.
    pub fn decode_payloads<M: WireMessage>(&self, message: &mut M) -> Result<(), ProtocolError> {
        let payloads = message.payloads_mut();
        for slot in payloads.values {
            *slot = self.tree.decode_tree(slot)?;
        }
        for items in payloads.sequences {
            for item in items.iter_mut() {
                *item = self.tree.decode_tree(item)?;
            }
        }
        for map in payloads.mappings {
            *map = self.tree.decode_entries(map)?;
        }
        Ok(())
    }

    /// Encodes a message's payloads and packs the record.
    pub fn serialize_message<M: WireMessage>(&self, message: &M) -> Result<Vec<u8>, ProtocolError> {
        let mut message = message.clone();
        self.encode_payloads(&mut message)?;
        self.codec.encode(&message)
    }

    /// Unpacks a record, validates it (unless disabled in the decode
    /// options), and decodes its payloads.
    ///
    /// # Errors
    /// `ProtocolError::InvalidMessage` if the record breaks the rules for
    /// its shape, plus everything [`deserialize`](Self::deserialize) can
    /// return.
    pub fn deserialize_message<M: WireMessage>(&self, bytes: &[u8]) -> Result<M, ProtocolError> {
        let mut message: M = self.codec.decode(bytes)?;
        if self.tree.decode.validate {
            message.validate()?;
        }
        self.decode_payloads(&mut message).inspect_err(|err| {
            tracing::debug!(%err, etype = message.etype(), "message decode failed");
        })?;
        Ok(message)
    }

    pub fn serialize_message_to_base64<M: WireMessage>(
        &self,
        message: &M,
    ) -> Result<String, ProtocolError> {
        self.serialize_message(message).map(|bytes| to_base64(&bytes))
    }

    pub fn deserialize_message_from_base64<M: WireMessage>(
        &self,
        text: &str,
    ) -> Result<M, ProtocolError> {
        self.deserialize_message(&from_base64(text)?)
    }
}

// ---------------------------------------------------------------------------
// Free functions (global registry, MessagePack)
// ---------------------------------------------------------------------------

/// Serializes a value tree to MessagePack with the global registry.
pub fn serialize(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().serialize(value)
}

/// Deserializes a MessagePack value tree with the global registry.
pub fn deserialize(bytes: &[u8]) -> Result<Value, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().deserialize(bytes)
}

pub fn serialize_to_base64(value: &Value) -> Result<String, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().serialize_to_base64(value)
}

pub fn deserialize_from_base64(text: &str) -> Result<Value, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().deserialize_from_base64(text)
}

/// Serializes a message envelope to MessagePack with the global registry.
pub fn serialize_message<M: WireMessage>(message: &M) -> Result<Vec<u8>, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().serialize_message(message)
}

/// Deserializes and validates a MessagePack message envelope.
pub fn deserialize_message<M: WireMessage>(bytes: &[u8]) -> Result<M, ProtocolError> {
    WireCodec::<MsgpackCodec>::default().deserialize_message(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodeOptions, Message, RpcRequest, ServerEvent, TypeRegistry, ZData};

    fn isolated() -> WireCodec {
        WireCodec::new(TreeCodec::new(TypeRegistry::with_builtins()), MsgpackCodec)
    }

    #[test]
    fn test_serialize_message_encodes_kwargs() {
        let wire = isolated();
        let msg = Message::new("SET")
            .with_rtype("rpc-1")
            .with_kwargs(
                [
                    ("points".to_owned(), Value::native(vec![1i16, 2])),
                    ("absent".to_owned(), Value::Nil),
                ]
                .into_iter()
                .collect(),
            );

        let raw: Message = MsgpackCodec
            .decode(&wire.serialize_message(&msg).unwrap())
            .unwrap();
        let kwargs = raw.kwargs.unwrap();
        assert_eq!(ZData::type_tag_of(&kwargs["points"]), Some("Int16Array"));
        assert!(!kwargs.contains_key("absent"));
    }

    #[test]
    fn test_deserialize_message_decodes_args() {
        let wire = isolated();
        let request = RpcRequest::new("render", "rpc-9")
            .with_args(vec![Value::native(vec![0.5f64]), Value::from("hi")]);

        let back: RpcRequest = wire
            .deserialize_message(&wire.serialize_message(&request).unwrap())
            .unwrap();
        let args = back.args.unwrap();
        assert_eq!(args[0].as_native::<Vec<f64>>(), Some(&vec![0.5]));
        assert_eq!(args[1], Value::from("hi"));
    }

    #[test]
    fn test_deserialize_message_validates() {
        let wire = isolated();
        let bytes = MsgpackCodec.encode(&ServerEvent::new("", 1)).unwrap();
        let err = wire.deserialize_message::<ServerEvent>(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_deserialize_message_skips_validation_when_disabled() {
        let mut wire = isolated();
        wire.tree_mut().decode = DecodeOptions {
            validate: false,
            ..DecodeOptions::default()
        };
        let bytes = MsgpackCodec.encode(&ServerEvent::new("", 1)).unwrap();
        assert!(wire.deserialize_message::<ServerEvent>(&bytes).is_ok());
    }

    #[test]
    fn test_deserialize_message_extra_fields_are_decoded() {
        let wire = isolated();
        let msg = Message::new("E").with_field("mask", Value::native(vec![1u8, 0, 1]));

        let back: Message = wire
            .deserialize_message(&wire.serialize_message(&msg).unwrap())
            .unwrap();
        assert_eq!(back.extra["mask"].as_native::<Vec<u8>>(), Some(&vec![1, 0, 1]));
    }

    #[test]
    fn test_serialize_base64_round_trip() {
        let wire = isolated();
        let value = Value::native(vec![10u32, 20]);
        let text = wire.serialize_to_base64(&value).unwrap();
        let back = wire.deserialize_from_base64(&text).unwrap();
        assert_eq!(back.as_native::<Vec<u32>>(), Some(&vec![10, 20]));
    }

    #[test]
    fn test_serialize_unclaimed_native_is_encode_error() {
        struct Opaque;
        let err = isolated().serialize(&Value::native(Opaque)).unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(_)));
    }

    #[test]
    fn test_deserialize_garbage_is_decode_error() {
        let err = isolated().deserialize(&[0xc1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
