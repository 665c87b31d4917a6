//! Numeric post-processing applied to resolved buffers.
//!
//! - [`scale_offset`] - multiply / add a constant to every element in place.
//! - [`subset`] - strided multi-dimensional subsetting, optionally fused with
//!   scale and offset.

pub mod scale_offset;
pub mod subset;

pub use scale_offset::{apply_offset, apply_scale};
pub use subset::{apply_subsetting, parse_slice, SubsetInfo};
