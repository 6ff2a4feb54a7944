//! Built-in registrations: fixed-width numeric arrays and `numpy.ndarray`,
//! plus `image` when that feature is on.
//!
//! Typed arrays travel as their backing bytes plus an element count:
//!
//! | Rust type  | `ztype`        | `dtype`   |
//! |------------|----------------|-----------|
//! | `Vec<i8>`  | `Int8Array`    | `int8`    |
//! | `Vec<u8>`  | `Uint8Array`   | `uint8`   |
//! | `Vec<i16>` | `Int16Array`   | `int16`   |
//! | `Vec<u16>` | `Uint16Array`  | `uint16`  |
//! | `Vec<i32>` | `Int32Array`   | `int32`   |
//! | `Vec<u32>` | `Uint32Array`  | `uint32`  |
//! | `Vec<f32>` | `Float32Array` | `float32` |
//! | `Vec<f64>` | `Float64Array` | `float64` |
//!
//! The bytes are in the sender's native byte order. No byte-order marker is
//! carried, so peers on different-endian machines will misread each other.

use crate::registry::TypeRegistry;
use crate::{ProtocolError, ZData};

/// Tag of the multi-dimensional array interop type.
pub const NDARRAY_TAG: &str = "numpy.ndarray";

/// A fixed-width numeric element that can be packed as raw bytes.
pub trait Element: Copy + Send + Sync + 'static {
    /// The numpy name of the element type.
    const DTYPE: &'static str;
    /// Size of one element in bytes.
    const WIDTH: usize;

    fn extend_bytes(self, out: &mut Vec<u8>);

    /// Reads one element from exactly [`WIDTH`](Self::WIDTH) bytes.
    fn from_chunk(chunk: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:literal),* $(,)?) => {
        $(impl Element for $t {
            const DTYPE: &'static str = $dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn extend_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn from_chunk(chunk: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(chunk);
                <$t>::from_ne_bytes(raw)
            }
        })*
    };
}

impl_element! {
    i8 => "int8",
    u8 => "uint8",
    i16 => "int16",
    u16 => "uint16",
    i32 => "int32",
    u32 => "uint32",
    i64 => "int64",
    u64 => "uint64",
    f32 => "float32",
    f64 => "float64",
}

pub(crate) fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::WIDTH);
    for &v in values {
        v.extend_bytes(&mut out);
    }
    out
}

fn from_bytes<T: Element>(type_tag: &str, bytes: &[u8]) -> Result<Vec<T>, ProtocolError> {
    if bytes.len() % T::WIDTH != 0 {
        return Err(ProtocolError::malformed(
            type_tag,
            format!(
                "{} bytes is not a multiple of the {}-byte element width",
                bytes.len(),
                T::WIDTH
            ),
        ));
    }
    Ok(bytes.chunks_exact(T::WIDTH).map(T::from_chunk).collect())
}

// ---------------------------------------------------------------------------
// Typed arrays
// ---------------------------------------------------------------------------

fn encode_typed<T: Element>(type_tag: &str, values: &[T]) -> ZData {
    ZData::new(type_tag)
        .with_binary(to_bytes(values))
        .with_element_type(T::DTYPE)
        .with_shape(vec![values.len() as u64])
}

fn decode_typed<T: Element>(type_tag: &str, zdata: &ZData) -> Result<Vec<T>, ProtocolError> {
    let bytes = zdata
        .binary
        .as_deref()
        .ok_or_else(|| ProtocolError::malformed(type_tag, "missing binary payload"))?;
    let values = from_bytes::<T>(type_tag, bytes)?;

    if let Some(shape) = &zdata.shape {
        if shape.as_slice() != [values.len() as u64] {
            return Err(ProtocolError::malformed(
                type_tag,
                format!("shape {shape:?} does not match {} elements", values.len()),
            ));
        }
    }
    Ok(values)
}

fn register_typed<T: Element>(registry: &TypeRegistry, type_tag: &'static str) {
    registry.register_type::<Vec<T>, _, _>(
        type_tag,
        move |values| Ok(encode_typed(type_tag, values)),
        move |zdata| decode_typed(type_tag, zdata),
    );
}

// ---------------------------------------------------------------------------
// NdArray
// ---------------------------------------------------------------------------

/// A multi-dimensional array in numpy's wire layout: a flat C-order byte
/// buffer described by a dtype name and a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}

impl NdArray {
    /// Builds an array from typed elements.
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] if `shape` doesn't describe `values.len()`
    /// elements.
    pub fn from_slice<T: Element>(shape: Vec<u64>, values: &[T]) -> Result<Self, ProtocolError> {
        let Some(count) = element_count(&shape) else {
            return Err(ProtocolError::Encode(format!(
                "shape {shape:?} overflows the element count"
            )));
        };
        if count != values.len() as u64 {
            return Err(ProtocolError::Encode(format!(
                "shape {shape:?} holds {count} elements, got {}",
                values.len()
            )));
        }
        Ok(Self {
            dtype: T::DTYPE.to_owned(),
            shape,
            data: to_bytes(values),
        })
    }

    /// Copies the elements out as `T`. Fails if `T` isn't the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ProtocolError> {
        if self.dtype != T::DTYPE {
            return Err(ProtocolError::Decode(format!(
                "array has dtype {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        from_bytes(NDARRAY_TAG, &self.data)
    }

    /// Number of elements (the product of the shape), saturating at
    /// `u64::MAX` for shapes too large to count.
    pub fn len(&self) -> u64 {
        element_count(&self.shape).unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

/// Product of the dimensions, or `None` if it doesn't fit in a `u64`.
fn element_count(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
}

/// Byte width of a numpy dtype name, when we know it.
fn itemsize(dtype: &str) -> Option<u64> {
    match dtype {
        "bool" | "int8" | "uint8" => Some(1),
        "int16" | "uint16" | "float16" => Some(2),
        "int32" | "uint32" | "float32" => Some(4),
        "int64" | "uint64" | "float64" | "complex64" => Some(8),
        "complex128" => Some(16),
        _ => None,
    }
}

fn encode_ndarray(array: &NdArray) -> Result<ZData, ProtocolError> {
    Ok(ZData::new(NDARRAY_TAG)
        .with_binary(array.data.clone())
        .with_element_type(array.dtype.clone())
        .with_shape(array.shape.clone()))
}

fn decode_ndarray(zdata: &ZData) -> Result<NdArray, ProtocolError> {
    let missing = |field| ProtocolError::malformed(NDARRAY_TAG, format!("missing {field}"));
    let data = zdata.binary.clone().ok_or_else(|| missing("binary payload"))?;
    let dtype = zdata.element_type.clone().ok_or_else(|| missing("dtype"))?;
    let shape = zdata.shape.clone().ok_or_else(|| missing("shape"))?;

    if let Some(width) = itemsize(&dtype) {
        let Some(expected) = element_count(&shape).and_then(|n| n.checked_mul(width)) else {
            return Err(ProtocolError::malformed(
                NDARRAY_TAG,
                format!("{dtype} array of shape {shape:?} is too large to address"),
            ));
        };
        if expected != data.len() as u64 {
            return Err(ProtocolError::malformed(
                NDARRAY_TAG,
                format!(
                    "{dtype} array of shape {shape:?} needs {expected} bytes, got {}",
                    data.len()
                ),
            ));
        }
    }
    Ok(NdArray { dtype, shape, data })
}

/// Installs every built-in registration.
pub(crate) fn install(registry: &TypeRegistry) {
    register_typed::<i8>(registry, "Int8Array");
    register_typed::<u8>(registry, "Uint8Array");
    register_typed::<i16>(registry, "Int16Array");
    register_typed::<u16>(registry, "Uint16Array");
    register_typed::<i32>(registry, "Int32Array");
    register_typed::<u32>(registry, "Uint32Array");
    register_typed::<f32>(registry, "Float32Array");
    register_typed::<f64>(registry, "Float64Array");
    registry.register_type::<NdArray, _, _>(NDARRAY_TAG, encode_ndarray, decode_ndarray);
    #[cfg(feature = "image")]
    crate::images::install(registry);
}
