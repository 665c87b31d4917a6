//! In-place scale and offset.
//!
//! Both operations work on scalars and arrays alike. Float buffers compute in
//! `f64`. Integer buffers compute natively so 64-bit values keep every bit:
//! offsets round to nearest, integral factors multiply exactly, and results
//! saturate at the type's bounds. String buffers are rejected.

use tracing::trace;

use crate::buffer::{with_element_type, Element, TypedBuffer};
use crate::error::{Result, TokamapError};

/// Add `offset` to every element of `buffer`.
pub fn apply_offset(buffer: &mut TypedBuffer, offset: f64) -> Result<()> {
    trace!(offset, data_type = %buffer.data_type(), "Applying offset");
    let data_type = buffer.data_type();
    with_element_type!(data_type, T => {
        buffer.map_in_place(|v: T| v.scale_offset(1.0, offset))
    }, string => Err(TokamapError::UnsupportedType {
        operation: "offset",
        data_type,
    }))
}

/// Multiply every element of `buffer` by `factor`.
pub fn apply_scale(buffer: &mut TypedBuffer, factor: f64) -> Result<()> {
    trace!(factor, data_type = %buffer.data_type(), "Applying scale");
    let data_type = buffer.data_type();
    with_element_type!(data_type, T => {
        buffer.map_in_place(|v: T| v.scale_offset(factor, 0.0))
    }, string => Err(TokamapError::UnsupportedType {
        operation: "scale",
        data_type,
    }))
}
