//! Conversions between [`NdArray`] and `ndarray::ArrayD`, behind the
//! `ndarray` feature.
//!
//! The wire layout is always C order, so arrays in any memory layout are
//! read out in logical order when converted.

use ::ndarray::{ArrayD, IxDyn};

use crate::ProtocolError;
use crate::builtin::{Element, NdArray, to_bytes};

impl<T: Element> TryFrom<&NdArray> for ArrayD<T> {
    type Error = ProtocolError;

    fn try_from(array: &NdArray) -> Result<Self, Self::Error> {
        let values = array.to_vec::<T>()?;
        let shape = array
            .shape
            .iter()
            .map(|&dim| usize::try_from(dim))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                ProtocolError::Decode(format!("shape {:?} exceeds this platform", array.shape))
            })?;

        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|err| {
            ProtocolError::Decode(format!("shape {:?} rejected: {err}", array.shape))
        })
    }
}

impl<T: Element> TryFrom<NdArray> for ArrayD<T> {
    type Error = ProtocolError;

    fn try_from(array: NdArray) -> Result<Self, Self::Error> {
        Self::try_from(&array)
    }
}

impl<T: Element> From<ArrayD<T>> for NdArray {
    fn from(array: ArrayD<T>) -> Self {
        let values: Vec<T> = array.iter().copied().collect();
        Self {
            dtype: T::DTYPE.to_owned(),
            shape: array.shape().iter().map(|&dim| dim as u64).collect(),
            data: to_bytes(&values),
        }
    }
}
