//! The type registry: a runtime catalog of (encoder, decoder) pairs.
//!
//! Each registration ties a type tag (`"Float32Array"`, `"custom.Point"`)
//! to an encoder that turns a value into a [`ZData`] and a decoder that
//! turns the `ZData` back. Encoding dispatches in two steps:
//!
//! 1. **Direct match**: a [`Value::Native`] is looked up by its concrete
//!    Rust type (`TypeId`). One hash probe, first hit wins.
//! 2. **Predicate match**: registrations with a predicate are scanned in
//!    registration order. This is how duck-typed values opt in, e.g. "any
//!    map with `x`, `y` and `z` keys".
//!
//! If neither matches, the value is returned unchanged. Decoding looks up
//! the `ztype`; an unknown tag is a hard error, never a passthrough.
//!
//! # Concurrency
//!
//! A `TypeRegistry` is a handle to a shared table behind a readers-writer
//! lock. Encodes and decodes only take the read side, and user callbacks run
//! after the lock is released, so an encoder may itself register types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::builtin;
use crate::{ProtocolError, Value, ZData};

/// Encoder: `Ok(None)` means "not mine", never an error.
pub type EncodeFn = Arc<dyn Fn(&Value) -> Result<Option<ZData>, ProtocolError> + Send + Sync>;

/// Decoder: rebuilds an application value from its envelope.
pub type DecodeFn = Arc<dyn Fn(&ZData) -> Result<Value, ProtocolError> + Send + Sync>;

/// Predicate for types without a fixed Rust identity.
pub type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// TypeRegistration
// ---------------------------------------------------------------------------

/// Everything the registry needs to know about one type tag.
///
/// ```rust
/// use vmp_protocol::{TypeRegistration, TypeRegistry, Value, ZData};
///
/// // Any map with x/y/z keys travels as a "custom.Vec3".
/// let registration = TypeRegistration::new(
///     "custom.Vec3",
///     |value| {
///         let xyz = ["x", "y", "z"].map(|k| value.get(k).and_then(Value::as_f64));
///         Ok(match xyz {
///             [Some(x), Some(y), Some(z)] => {
///                 let xyz = vec![Value::from(x), Value::from(y), Value::from(z)];
///                 Some(ZData::new("custom.Vec3").with_field("xyz", xyz))
///             }
///             _ => None,
///         })
///     },
///     |zdata| Ok(zdata.field("xyz").cloned().unwrap_or_default()),
/// )
/// .match_when(|value| ["x", "y", "z"].iter().all(|k| value.get(k).is_some()));
///
/// let registry = TypeRegistry::new();
/// registry.register(registration);
/// assert!(registry.is_registered("custom.Vec3"));
/// ```
#[derive(Clone)]
pub struct TypeRegistration {
    type_tag: String,
    encoder: EncodeFn,
    decoder: DecodeFn,
    direct_match: Option<TypeId>,
    predicate: Option<PredicateFn>,
}

impl TypeRegistration {
    /// A registration with no match criteria yet. Without
    /// [`match_type`](Self::match_type) or [`match_when`](Self::match_when)
    /// it only contributes a decoder.
    pub fn new<E, D>(type_tag: impl Into<String>, encoder: E, decoder: D) -> Self
    where
        E: Fn(&Value) -> Result<Option<ZData>, ProtocolError> + Send + Sync + 'static,
        D: Fn(&ZData) -> Result<Value, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            type_tag: type_tag.into(),
            encoder: Arc::new(encoder),
            decoder: Arc::new(decoder),
            direct_match: None,
            predicate: None,
        }
    }

    /// Claims every [`Value::Native`] whose concrete type is exactly `T`.
    pub fn match_type<T: Any>(mut self) -> Self {
        self.direct_match = Some(TypeId::of::<T>());
        self
    }

    /// Claims every value the predicate accepts.
    pub fn match_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Table {
    /// Keyed by tag, in first-registration order.
    decoders: IndexMap<String, DecodeFn>,
    /// The O(1) fast path for native Rust types.
    by_type: HashMap<TypeId, (String, EncodeFn)>,
    /// Scanned in order when no direct match exists.
    predicates: Vec<(PredicateFn, String, EncodeFn)>,
}

static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::with_builtins);

/// A catalog of registered types. Cloning yields another handle to the
/// same table.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    table: Arc<RwLock<Table>>,
}

impl TypeRegistry {
    /// Creates an empty registry. Useful for isolated tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in numeric array types installed.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtin::install(&registry);
        registry
    }

    /// The process-wide registry, built with the built-in types on first use.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    /// Inserts or replaces the registration for a tag.
    ///
    /// Re-registering a tag silently replaces it, last writer wins. The
    /// tag keeps its original position in [`registered_tags`](Self::registered_tags).
    pub fn register(&self, registration: TypeRegistration) {
        let TypeRegistration {
            type_tag,
            encoder,
            decoder,
            direct_match,
            predicate,
        } = registration;

        let mut table = self.table.write();
        let replaced = table.decoders.insert(type_tag.clone(), decoder).is_some();
        if replaced {
            table.by_type.retain(|_, (tag, _)| *tag != type_tag);
            table.predicates.retain(|(_, tag, _)| *tag != type_tag);
        }
        if let Some(type_id) = direct_match {
            table.by_type.insert(type_id, (type_tag.clone(), encoder.clone()));
        }
        if let Some(predicate) = predicate {
            table.predicates.push((predicate, type_tag.clone(), encoder));
        }
        drop(table);

        tracing::debug!(%type_tag, replaced, "type registered");
    }

    /// Registers a native Rust type `T` under `type_tag`.
    ///
    /// The encoder receives the unwrapped `&T`; the decoder returns a `T`,
    /// which is wrapped back into a [`Value::Native`].
    pub fn register_type<T, E, D>(&self, type_tag: impl Into<String>, encode: E, decode: D)
    where
        T: Any + Send + Sync,
        E: Fn(&T) -> Result<ZData, ProtocolError> + Send + Sync + 'static,
        D: Fn(&ZData) -> Result<T, ProtocolError> + Send + Sync + 'static,
    {
        let registration = TypeRegistration::new(
            type_tag,
            move |value| value.as_native::<T>().map(&encode).transpose(),
            move |zdata| decode(zdata).map(Value::native),
        )
        .match_type::<T>();
        self.register(registration);
    }

    /// Encodes a value if a registered type claims it.
    ///
    /// Returns `Ok(None)` when nothing matches. Errors come only from a
    /// user encoder that matched and then failed.
    pub fn try_encode(&self, value: &Value) -> Result<Option<ZData>, ProtocolError> {
        if let Value::Native(native) = value {
            let direct = self.table.read().by_type.get(&native.type_id()).cloned();
            if let Some((_, encoder)) = direct {
                if let Some(zdata) = encoder(value)? {
                    return Ok(Some(zdata));
                }
            }
        }

        // Snapshot the predicate list so callbacks run without the lock.
        let predicates: Vec<(PredicateFn, EncodeFn)> = self
            .table
            .read()
            .predicates
            .iter()
            .map(|(predicate, _, encoder)| (predicate.clone(), encoder.clone()))
            .collect();

        for (predicate, encoder) in predicates {
            if predicate(value) {
                if let Some(zdata) = encoder(value)? {
                    return Ok(Some(zdata));
                }
            }
        }

        Ok(None)
    }

    /// Encodes a value, or returns it unchanged if no registered type
    /// matches.
    pub fn encode(&self, value: &Value) -> Result<Value, ProtocolError> {
        Ok(match self.try_encode(value)? {
            Some(zdata) => zdata.into_value(),
            None => value.clone(),
        })
    }

    /// Decodes an envelope with the decoder registered for its tag.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownTypeTag`] if nothing is registered for
    /// `zdata.type_tag`.
    pub fn decode_zdata(&self, zdata: &ZData) -> Result<Value, ProtocolError> {
        let decoder = self
            .table
            .read()
            .decoders
            .get(&zdata.type_tag)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownTypeTag(zdata.type_tag.clone()))?;
        decoder(zdata)
    }

    /// Decodes a value if it's an encoded value, or returns it unchanged.
    pub fn decode(&self, value: &Value) -> Result<Value, ProtocolError> {
        match ZData::from_value(value) {
            Some(zdata) => self.decode_zdata(&zdata),
            None => Ok(value.clone()),
        }
    }

    /// Returns `true` if `value` is an encoded value (a map with a string
    /// `ztype`).
    pub fn is_encoded_value(value: &Value) -> bool {
        ZData::is_encoded(value)
    }

    /// The tag of an encoded value.
    pub fn type_tag(value: &Value) -> Option<&str> {
        ZData::type_tag_of(value)
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.table.read().decoders.contains_key(type_tag)
    }

    /// All registered tags, in the order their decoders were first added.
    pub fn registered_tags(&self) -> Vec<String> {
        self.table.read().decoders.keys().cloned().collect()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.registered_tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: f64,
        y: f64,
    }

    fn point_registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register_type(
            "custom.Point",
            |p: &Point| {
                Ok(ZData::new("custom.Point")
                    .with_field("x", p.x)
                    .with_field("y", p.y))
            },
            |zdata| {
                let coord = |k| {
                    zdata
                        .field(k)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| {
                            ProtocolError::malformed("custom.Point", format!("missing {k}"))
                        })
                };
                Ok(Point {
                    x: coord("x")?,
                    y: coord("y")?,
                })
            },
        );
        registry
    }

    fn tagging(tag: &'static str) -> TypeRegistration {
        TypeRegistration::new(
            tag,
            move |_| Ok(Some(ZData::new(tag))),
            move |_| Ok(Value::from(tag)),
        )
    }

    #[test]
    fn test_encode_direct_match_produces_zdata() {
        let registry = point_registry();
        let encoded = registry.encode(&Value::native(Point { x: 1.0, y: 2.0 })).unwrap();
        assert_eq!(TypeRegistry::type_tag(&encoded), Some("custom.Point"));
        assert_eq!(encoded.get("x"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_decode_round_trips_native_type() {
        let registry = point_registry();
        let point = Point { x: 3.0, y: -4.0 };
        let encoded = registry.encode(&Value::native(point.clone())).unwrap();
        let decoded = registry.decode(&encoded).unwrap();
        assert_eq!(decoded.as_native::<Point>(), Some(&point));
    }

    #[test]
    fn test_encode_unmatched_value_passes_through() {
        let registry = point_registry();
        for value in [
            Value::from(42),
            Value::from("x"),
            Value::Array(vec![1.into(), 2.into(), 3.into()]),
            [("a", 1)].into_iter().collect(),
            Value::native(7u32),
        ] {
            assert_eq!(registry.encode(&value).unwrap(), value);
        }
    }

    #[test]
    fn test_encode_predicate_match() {
        let registry = TypeRegistry::new();
        registry.register(
            tagging("vec3").match_when(|v| ["x", "y", "z"].iter().all(|k| v.get(k).is_some())),
        );

        let xyz: Value = [("x", 1), ("y", 2), ("z", 3)].into_iter().collect();
        let xy: Value = [("x", 1), ("y", 2)].into_iter().collect();

        assert!(TypeRegistry::is_encoded_value(&registry.encode(&xyz).unwrap()));
        assert_eq!(registry.encode(&xy).unwrap(), xy);
    }

    #[test]
    fn test_encode_predicates_scanned_in_registration_order() {
        let registry = TypeRegistry::new();
        registry.register(tagging("first").match_when(|v| v.as_i64().is_some()));
        registry.register(tagging("second").match_when(|_| true));

        let encoded = registry.encode(&Value::from(1)).unwrap();
        assert_eq!(TypeRegistry::type_tag(&encoded), Some("first"));

        let encoded = registry.encode(&Value::from("s")).unwrap();
        assert_eq!(TypeRegistry::type_tag(&encoded), Some("second"));
    }

    #[test]
    fn test_encode_direct_match_beats_predicate() {
        let registry = TypeRegistry::new();
        registry.register(tagging("predicate").match_when(|_| true));
        registry.register(tagging("direct").match_type::<Point>());

        let encoded = registry.encode(&Value::native(Point { x: 0.0, y: 0.0 })).unwrap();
        assert_eq!(TypeRegistry::type_tag(&encoded), Some("direct"));
    }

    #[test]
    fn test_encode_not_applicable_continues_scan() {
        let registry = TypeRegistry::new();
        registry.register(
            TypeRegistration::new("picky", |_| Ok(None), |_| Ok(Value::Nil)).match_when(|_| true),
        );
        registry.register(tagging("fallback").match_when(|_| true));

        let encoded = registry.encode(&Value::from(true)).unwrap();
        assert_eq!(TypeRegistry::type_tag(&encoded), Some("fallback"));
    }

    #[test]
    fn test_encode_propagates_encoder_failure() {
        let registry = TypeRegistry::new();
        registry.register(
            TypeRegistration::new(
                "broken",
                |_| Err(ProtocolError::Encode("boom".into())),
                |_| Ok(Value::Nil),
            )
            .match_when(|_| true),
        );

        let err = registry.encode(&Value::from(1)).unwrap_err();
        assert_eq!(err, ProtocolError::Encode("boom".into()));
    }

    #[test]
    fn test_decode_unknown_tag_fails() {
        let registry = TypeRegistry::new();
        let value = ZData::new("nonexistent.Type").with_binary(vec![1, 2, 3]).into_value();

        let err = registry.decode(&value).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownTypeTag("nonexistent.Type".into()));
    }

    #[test]
    fn test_decode_plain_value_passes_through() {
        let registry = TypeRegistry::new();
        let value: Value = [("type", "not a ztype")].into_iter().collect();
        assert_eq!(registry.decode(&value).unwrap(), value);
    }

    #[test]
    fn test_register_same_tag_last_writer_wins() {
        let registry = TypeRegistry::new();
        registry.register(tagging("a"));
        registry.register(tagging("b"));
        registry.register(TypeRegistration::new("a", |_| Ok(None), |_| Ok(Value::from("second"))));

        assert_eq!(registry.registered_tags(), vec!["a", "b"]);
        let decoded = registry.decode(&ZData::new("a").into_value()).unwrap();
        assert_eq!(decoded, Value::from("second"));
    }

    #[test]
    fn test_register_replacement_drops_old_predicate() {
        let registry = TypeRegistry::new();
        registry.register(tagging("t").match_when(|_| true));
        registry.register(tagging("t"));

        assert_eq!(registry.encode(&Value::from(1)).unwrap(), Value::from(1));
    }

    #[test]
    fn test_isolated_registries_do_not_share_types() {
        let a = TypeRegistry::new();
        let b = TypeRegistry::new();
        a.register(tagging("only.in.a"));

        assert!(a.is_registered("only.in.a"));
        assert!(!b.is_registered("only.in.a"));
        // Clones share the table.
        assert!(a.clone().is_registered("only.in.a"));
    }

    #[test]
    fn test_encoder_may_register_types() {
        let registry = TypeRegistry::new();
        let inner = registry.clone();
        registry.register(
            TypeRegistration::new(
                "lazy",
                move |_| {
                    inner.register(tagging("late"));
                    Ok(Some(ZData::new("lazy")))
                },
                |_| Ok(Value::Nil),
            )
            .match_when(|_| true),
        );

        registry.encode(&Value::from(1)).unwrap();
        assert!(registry.is_registered("late"));
    }

    #[test]
    fn test_global_has_builtins() {
        assert!(TypeRegistry::global().is_registered("Float32Array"));
    }
}
