//! Strided multi-dimensional subsetting.
//!
//! A buffer of rank `n` is subset with `n` [`SubsetInfo`] descriptors, outermost
//! (slowest varying) dimension first. Input and output are both row-major.
//! Dimension `d` visits `start + i * stride` for `i` in `0..size()`, where
//! `size() = floor((stop - start) / stride)`. Output positions are produced in
//! row-major order: the per-dimension cursors carry from the innermost
//! dimension outwards.

use tracing::debug;

use crate::buffer::{with_element_type, Element, TypedBuffer};
use crate::error::{Result, TokamapError};

/// Subset of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsetInfo {
    start: usize,
    stop: usize,
    stride: usize,
    dim_size: usize,
}

impl SubsetInfo {
    /// The whole of a dimension of `dim_size` elements.
    pub fn full(dim_size: usize) -> Self {
        Self {
            start: 0,
            stop: dim_size,
            stride: 1,
            dim_size,
        }
    }

    /// `start..stop` in steps of `stride`. `start == stop == 0` selects the whole dimension.
    pub fn new(start: usize, stop: usize, stride: usize, dim_size: usize) -> Self {
        let stop = if start == 0 && stop == 0 { dim_size } else { stop };
        Self {
            start,
            stop,
            stride,
            dim_size,
        }
    }

    /// First selected index.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Exclusive upper bound.
    pub fn stop(&self) -> usize {
        self.stop
    }

    /// Step between selected indices.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Extent of the dimension in the input.
    pub fn dim_size(&self) -> usize {
        self.dim_size
    }

    /// Number of selected elements.
    pub fn size(&self) -> usize {
        if self.stride == 0 {
            return 0;
        }
        self.stop.saturating_sub(self.start) / self.stride
    }

    /// Check `start <= stop <= dim_size` and `1 <= stride < dim_size`.
    ///
    /// A dimension of extent 0 or 1 accepts a stride of 1.
    pub fn validate(&self) -> Result<()> {
        let stride_ok = self.stride >= 1 && (self.stride < self.dim_size || self.dim_size <= 1);
        if self.start > self.stop || self.stop > self.dim_size || !stride_ok {
            return Err(TokamapError::InvalidSubset(format!(
                "start {} stop {} stride {} is invalid for a dimension of {}",
                self.start, self.stop, self.stride, self.dim_size
            )));
        }
        Ok(())
    }
}

/// Parse a slice string such as `"[2:10:2, :]"` or `"[2:10:2][:]"` against `shape`.
///
/// Each dimension takes `start:stop:stride`; omitted fields default to `0`,
/// the dimension size and `1`. A bare index `i` selects `i:i+1`.
pub fn parse_slice(slice: &str, shape: &[usize]) -> Result<Vec<SubsetInfo>> {
    let normalised = slice.replace('[', "").replace(']', ",");
    let parts: Vec<&str> = normalised
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.len() != shape.len() {
        return Err(TokamapError::InvalidSubset(format!(
            "slice '{slice}' has {} dimensions but the data has {}",
            parts.len(),
            shape.len()
        )));
    }

    parts
        .iter()
        .zip(shape)
        .map(|(part, &dim_size)| parse_dimension(slice, part, dim_size))
        .collect()
}

fn parse_dimension(slice: &str, part: &str, dim_size: usize) -> Result<SubsetInfo> {
    let field = |text: &str, default: usize| -> Result<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(default);
        }
        text.parse::<usize>().map_err(|_| {
            TokamapError::InvalidSubset(format!("cannot parse '{text}' in slice '{slice}'"))
        })
    };

    let fields: Vec<&str> = part.split(':').collect();
    let info = match fields.as_slice() {
        [index] => {
            let index = field(index, 0)?;
            let stop = index.checked_add(1).ok_or_else(|| {
                TokamapError::InvalidSubset(format!(
                    "index {index} in slice '{slice}' is out of range"
                ))
            })?;
            SubsetInfo {
                start: index,
                stop,
                stride: 1,
                dim_size,
            }
        }
        [start, stop] => SubsetInfo::new(field(start, 0)?, field(stop, dim_size)?, 1, dim_size),
        [start, stop, stride] => SubsetInfo::new(
            field(start, 0)?,
            field(stop, dim_size)?,
            field(stride, 1)?,
            dim_size,
        ),
        _ => {
            return Err(TokamapError::InvalidSubset(format!(
                "'{part}' in slice '{slice}' has too many fields"
            )))
        }
    };
    info.validate()?;
    Ok(info)
}

/// Subset a row-major array, applying `value * scale + offset` to each element.
pub fn subset<T: Element>(
    input: &[T],
    dims: &[SubsetInfo],
    scale: f64,
    offset: f64,
) -> Result<Vec<T>> {
    for dim in dims {
        dim.validate()?;
    }
    let input_len: usize = dims.iter().map(SubsetInfo::dim_size).product();
    if input_len != input.len() {
        return Err(TokamapError::InvalidSubset(format!(
            "descriptors cover {} elements but the input has {}",
            input_len,
            input.len()
        )));
    }

    let rank = dims.len();
    let mut input_strides = vec![1usize; rank];
    for d in (0..rank.saturating_sub(1)).rev() {
        input_strides[d] = input_strides[d + 1] * dims[d + 1].dim_size;
    }
    let sizes: Vec<usize> = dims.iter().map(SubsetInfo::size).collect();
    let result_len: usize = sizes.iter().product();
    debug!(input_len, result_len, scale, offset, "Subsetting");

    let transform = scale != 1.0 || offset != 0.0;
    let mut result = Vec::with_capacity(result_len);
    let mut cursor = vec![0usize; rank];

    for _ in 0..result_len {
        let input_index: usize = (0..rank)
            .map(|d| (dims[d].start + cursor[d] * dims[d].stride) * input_strides[d])
            .sum();
        let value = input[input_index];
        result.push(if transform {
            value.scale_offset(scale, offset)
        } else {
            value
        });

        for d in (0..rank).rev() {
            cursor[d] += 1;
            if cursor[d] < sizes[d] {
                break;
            }
            cursor[d] = 0;
        }
    }

    Ok(result)
}

/// Subset `buffer` in place. Rank-0 buffers are left untouched.
pub fn apply_subsetting(
    buffer: &mut TypedBuffer,
    dims: &[SubsetInfo],
    scale: f64,
    offset: f64,
) -> Result<()> {
    if buffer.rank() == 0 {
        return Ok(());
    }
    if dims.len() != buffer.rank() {
        return Err(TokamapError::InvalidSubset(format!(
            "{} descriptors for a rank {} buffer",
            dims.len(),
            buffer.rank()
        )));
    }
    for (d, (dim, &extent)) in dims.iter().zip(buffer.shape()).enumerate() {
        if dim.dim_size != extent {
            return Err(TokamapError::InvalidSubset(format!(
                "descriptor {d} expects {} elements, the buffer has {}",
                dim.dim_size, extent
            )));
        }
    }

    let shape: Vec<usize> = dims.iter().map(SubsetInfo::size).collect();
    let data_type = buffer.data_type();
    let subset_buffer = with_element_type!(data_type, T => {
        let values = subset(&buffer.values::<T>()?, dims, scale, offset)?;
        TypedBuffer::with_shape(&values, shape)?
    }, string => return Err(TokamapError::UnsupportedType {
        operation: "subset",
        data_type,
    }));
    *buffer = subset_buffer;
    Ok(())
}
