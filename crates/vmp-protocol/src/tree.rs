//! The recursive codec: walks a value tree and swaps application values
//! for their wire envelopes (and back).
//!
//! This layer sits between the application and the byte packer:
//!
//! ```text
//! encode: Value::Native(Vec<f32>) ──registry──→ { ztype: "Float32Array", b: .. }
//! decode: { ztype: "Float32Array", b: .. } ──registry──→ Value::Native(Vec<f32>)
//! ```
//!
//! Once the registry claims a node, its encoder (or decoder) owns that whole
//! subtree. The walk never descends into an envelope.

use serde::{Deserialize, Serialize};

use crate::registry::TypeRegistry;
use crate::value::Map;
use crate::{ProtocolError, Value, ZData};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for the encode direction.
///
/// `#[serde(default)]` lets a config file set only the fields it cares
/// about; missing ones come from [`Default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Walk into sequences and maps. When off, only the top-level value is
    /// offered to the registry.
    pub recursive: bool,

    /// Offer nodes to the type registry. When off, the tree is passed
    /// through as-is.
    pub use_registry: bool,

    /// Keep `Nil` map entries instead of dropping them. Sequence elements
    /// are never dropped.
    pub preserve_absent_values: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            use_registry: true,
            preserve_absent_values: false,
        }
    }
}

/// Knobs for the decode direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Walk into sequences and maps.
    pub recursive: bool,

    /// Decode envelopes through the type registry.
    pub use_registry: bool,

    /// Leave envelopes as raw maps. A relay can forward them without ever
    /// materializing the application values.
    pub preserve_encoded_values: bool,

    /// Run structural validation on decoded messages.
    pub validate: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            use_registry: true,
            preserve_encoded_values: false,
            validate: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TreeCodec
// ---------------------------------------------------------------------------

/// A registry plus the options to walk trees with.
///
/// The default codec uses [`TypeRegistry::global`]. Build one over an
/// isolated registry with [`TreeCodec::new`].
#[derive(Debug, Clone)]
pub struct TreeCodec {
    registry: TypeRegistry,
    pub encode: EncodeOptions,
    pub decode: DecodeOptions,
}

impl Default for TreeCodec {
    fn default() -> Self {
        Self::new(TypeRegistry::global().clone())
    }
}

impl TreeCodec {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            encode: EncodeOptions::default(),
            decode: DecodeOptions::default(),
        }
    }

    pub fn with_encode_options(mut self, options: EncodeOptions) -> Self {
        self.encode = options;
        self
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.decode = options;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encodes a tree with this codec's [`EncodeOptions`].
    ///
    /// # Errors
    /// Only what a registered encoder returns. Values nothing claims pass
    /// through untouched.
    pub fn encode_tree(&self, value: &Value) -> Result<Value, ProtocolError> {
        self.encode_tree_with(value, &self.encode)
    }

    pub fn encode_tree_with(
        &self,
        value: &Value,
        options: &EncodeOptions,
    ) -> Result<Value, ProtocolError> {
        self.encode_node(value, options, true)
    }

    /// Decodes a tree with this codec's [`DecodeOptions`].
    ///
    /// # Errors
    /// [`ProtocolError::UnknownTypeTag`] for an envelope nothing is
    /// registered for, or whatever a registered decoder returns.
    pub fn decode_tree(&self, value: &Value) -> Result<Value, ProtocolError> {
        self.decode_tree_with(value, &self.decode)
    }

    pub fn decode_tree_with(
        &self,
        value: &Value,
        options: &DecodeOptions,
    ) -> Result<Value, ProtocolError> {
        self.decode_node(value, options, true)
    }

    /// Encodes each entry of a mapping as a value of its own, dropping
    /// `Nil` entries unless absent values are preserved. The mapping itself
    /// is never offered to the registry.
    pub fn encode_entries(&self, map: &Map) -> Result<Map, ProtocolError> {
        let mut out = Map::with_capacity(map.len());
        for (key, item) in map {
            let encoded = self.encode_node(item, &self.encode, true)?;
            if encoded.is_nil() && !self.encode.preserve_absent_values {
                continue;
            }
            out.insert(key.clone(), encoded);
        }
        Ok(out)
    }

    /// Decodes each entry of a mapping as a value of its own.
    pub fn decode_entries(&self, map: &Map) -> Result<Map, ProtocolError> {
        map.iter()
            .map(|(key, item)| Ok((key.clone(), self.decode_node(item, &self.decode, true)?)))
            .collect()
    }

    fn encode_node(
        &self,
        value: &Value,
        options: &EncodeOptions,
        top: bool,
    ) -> Result<Value, ProtocolError> {
        // Primitives and envelopes are already wire-ready. Checking for an
        // envelope first is what makes encoding idempotent.
        if value.is_primitive() || ZData::is_encoded(value) {
            return Ok(value.clone());
        }

        if options.use_registry && (top || options.recursive) {
            if let Some(zdata) = self.registry.try_encode(value)? {
                return Ok(zdata.into_value());
            }
        }

        if !options.recursive {
            return Ok(value.clone());
        }

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.encode_node(item, options, false))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Map(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let encoded = self.encode_node(item, options, false)?;
                    if encoded.is_nil() && !options.preserve_absent_values {
                        continue;
                    }
                    out.insert(key.clone(), encoded);
                }
                Ok(Value::Map(out))
            }
            // An unclaimed native value. The packer reports it.
            _ => Ok(value.clone()),
        }
    }

    fn decode_node(
        &self,
        value: &Value,
        options: &DecodeOptions,
        top: bool,
    ) -> Result<Value, ProtocolError> {
        if ZData::is_encoded(value) {
            let wants_decode = options.use_registry && !options.preserve_encoded_values;
            return match ZData::from_value(value) {
                Some(zdata) if wants_decode && (top || options.recursive) => {
                    self.registry.decode_zdata(&zdata)
                }
                _ => Ok(value.clone()),
            };
        }

        if !options.recursive {
            return Ok(value.clone());
        }

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.decode_node(item, options, false))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Map(map) => map
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.decode_node(item, options, false)?)))
                .collect::<Result<Map, ProtocolError>>()
                .map(Value::Map),
            _ => Ok(value.clone()),
        }
    }
}

/// Encodes a tree with the global registry.
pub fn encode_tree(value: &Value, options: &EncodeOptions) -> Result<Value, ProtocolError> {
    TreeCodec::default().encode_tree_with(value, options)
}

/// Decodes a tree with the global registry.
pub fn decode_tree(value: &Value, options: &DecodeOptions) -> Result<Value, ProtocolError> {
    TreeCodec::default().decode_tree_with(value, options)
}
