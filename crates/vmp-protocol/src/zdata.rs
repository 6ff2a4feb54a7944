//! `ZData`: the tagged envelope for values that aren't wire primitives.
//!
//! On the wire a `ZData` is just a map with a string `ztype` field:
//!
//! ```text
//! { "ztype": "Float32Array", "b": <bin>, "dtype": "float32", "shape": [6], ...extra }
//! ```
//!
//! The `ztype` alone makes a map a `ZData`. Every other field is optional,
//! and fields beyond the reserved four are carried through unchanged.

use crate::value::{Map, Value};

/// Wire key of the type tag.
pub const TYPE_TAG_KEY: &str = "ztype";
/// Wire key of the binary payload.
pub const BINARY_KEY: &str = "b";
/// Wire key of the element-type descriptor.
pub const ELEMENT_TYPE_KEY: &str = "dtype";
/// Wire key of the shape vector.
pub const SHAPE_KEY: &str = "shape";

const RESERVED_KEYS: [&str; 4] = [TYPE_TAG_KEY, BINARY_KEY, ELEMENT_TYPE_KEY, SHAPE_KEY];

/// An encoded value: a type tag plus an open bag of typed fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZData {
    /// Selects the decoder on the receiving side, e.g. `"Float32Array"`.
    pub type_tag: String,

    /// Raw payload, e.g. an array's backing memory.
    pub binary: Option<Vec<u8>>,

    /// Free-form element type descriptor (`"float32"`, `"uint8"`, ...).
    pub element_type: Option<String>,

    /// Dimensional metadata.
    pub shape: Option<Vec<u64>>,

    /// Everything else, in insertion order.
    pub extra: Map,
}

impl ZData {
    /// Creates an empty envelope with the given tag.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.binary = Some(binary);
        self
    }

    pub fn with_element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    pub fn with_shape(mut self, shape: Vec<u64>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Adds an extra field. Reserved keys are ignored here; set them through
    /// the dedicated builders instead.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !RESERVED_KEYS.contains(&key.as_str()) {
            self.extra.insert(key, value.into());
        }
        self
    }

    /// Looks up an extra field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn is_type(&self, type_tag: &str) -> bool {
        self.type_tag == type_tag
    }

    /// Returns `true` if `value` is a map with a string `ztype`.
    pub fn is_encoded(value: &Value) -> bool {
        Self::type_tag_of(value).is_some()
    }

    /// The `ztype` of an encoded value, or `None` for anything else.
    pub fn type_tag_of(value: &Value) -> Option<&str> {
        value.get(TYPE_TAG_KEY).and_then(Value::as_str)
    }

    /// Reads an envelope out of a value tree node.
    ///
    /// Returns `None` if the node isn't an encoded value. Reserved fields
    /// with an unexpected wire type are kept as extras, so the decoder for
    /// the tag gets to decide whether that makes the value malformed.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let type_tag = map.get(TYPE_TAG_KEY)?.as_str()?.to_owned();

        let mut zdata = Self::new(type_tag);
        for (key, field) in map {
            match (key.as_str(), field) {
                (TYPE_TAG_KEY, _) => {}
                (BINARY_KEY, Value::Binary(bytes)) => zdata.binary = Some(bytes.clone()),
                (ELEMENT_TYPE_KEY, Value::String(s)) => zdata.element_type = Some(s.clone()),
                (SHAPE_KEY, Value::Array(dims)) if dims.iter().all(|d| d.as_u64().is_some()) => {
                    zdata.shape = Some(dims.iter().filter_map(Value::as_u64).collect());
                }
                _ => {
                    zdata.extra.insert(key.clone(), field.clone());
                }
            }
        }
        Some(zdata)
    }

    /// Converts the envelope into its wire map: reserved keys first, then
    /// extras in insertion order.
    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(4 + self.extra.len());
        map.insert(TYPE_TAG_KEY.to_owned(), Value::String(self.type_tag));
        if let Some(binary) = self.binary {
            map.insert(BINARY_KEY.to_owned(), Value::Binary(binary));
        }
        if let Some(element_type) = self.element_type {
            map.insert(ELEMENT_TYPE_KEY.to_owned(), Value::String(element_type));
        }
        if let Some(shape) = self.shape {
            map.insert(
                SHAPE_KEY.to_owned(),
                Value::Array(shape.into_iter().map(Value::from).collect()),
            );
        }
        for (key, value) in self.extra {
            map.entry(key).or_insert(value);
        }
        Value::Map(map)
    }
}

impl From<ZData> for Value {
    fn from(zdata: ZData) -> Self {
        zdata.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ZData {
        ZData::new("test.Type")
            .with_binary(vec![1, 2, 3, 4])
            .with_element_type("float32")
            .with_shape(vec![2, 2])
            .with_field("custom", "value")
    }

    #[test]
    fn test_builder_sets_fields() {
        let zdata = sample();
        assert_eq!(zdata.type_tag, "test.Type");
        assert_eq!(zdata.binary, Some(vec![1, 2, 3, 4]));
        assert_eq!(zdata.element_type.as_deref(), Some("float32"));
        assert_eq!(zdata.shape, Some(vec![2, 2]));
        assert_eq!(zdata.field("custom"), Some(&Value::from("value")));
    }

    #[test]
    fn test_with_field_ignores_reserved_keys() {
        let zdata = ZData::new("a").with_field("ztype", "b");
        assert!(zdata.extra.is_empty());
        assert_eq!(zdata.type_tag, "a");
    }

    #[test]
    fn test_into_value_uses_wire_keys() {
        let value = sample().into_value();
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["ztype", "b", "dtype", "shape", "custom"]);
        assert_eq!(value.get("shape"), Some(&Value::Array(vec![2.into(), 2.into()])));
    }

    #[test]
    fn test_from_value_inverts_into_value() {
        let zdata = sample();
        assert_eq!(ZData::from_value(&zdata.clone().into_value()), Some(zdata));
    }

    #[test]
    fn test_from_value_only_needs_type_tag() {
        let value: Value = [("ztype", "x")].into_iter().collect();
        let zdata = ZData::from_value(&value).unwrap();
        assert_eq!(zdata, ZData::new("x"));
    }

    #[test]
    fn test_from_value_rejects_non_string_tag() {
        let value: Value = [("ztype", 5)].into_iter().collect();
        assert!(!ZData::is_encoded(&value));
        assert_eq!(ZData::from_value(&value), None);
        assert_eq!(ZData::from_value(&Value::from("ztype")), None);
    }

    #[test]
    fn test_from_value_keeps_mistyped_reserved_fields_as_extra() {
        let value: Value = [
            ("ztype", Value::from("x")),
            ("b", Value::from("not bytes")),
            ("shape", Value::Array(vec![Value::Int(-1)])),
        ]
        .into_iter()
        .collect();

        let zdata = ZData::from_value(&value).unwrap();
        assert_eq!(zdata.binary, None);
        assert_eq!(zdata.shape, None);
        assert_eq!(zdata.field("b"), Some(&Value::from("not bytes")));
        assert!(zdata.field("shape").is_some());
    }
}
