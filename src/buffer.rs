//! Typed result buffer.
//!
//! Every mapping strategy produces a [`TypedBuffer`]: a byte vector tagged with its
//! element type and shape. Element-type specific code never reinterprets the bytes
//! directly. It goes through the [`Element`] trait, and callers that need to work on
//! any element type use [`with_element_type!`](crate::buffer::with_element_type)
//! to get an exhaustive `match` over [`DataType`].
//!
//! # Storage
//! Numeric data is stored in native byte order, `size_of(element) * len` bytes.
//! String buffers hold UTF-8 bytes and are always rank 0 with a single element.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TokamapError};

/// Number of leading/trailing elements shown by the `Display` summary.
const DISPLAY_EDGE: usize = 5;

/// Element type of a [`TypedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
    /// UTF-8 string.
    String,
}

impl DataType {
    /// All element types, numeric first.
    pub const ALL: [DataType; 11] = [
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
    ];

    /// Size of one element in bytes, or `None` for strings.
    pub fn size_of(self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            DataType::String => None,
        }
    }

    /// Whether the type is an integer or floating point type.
    pub fn is_numeric(self) -> bool {
        self != DataType::String
    }

    /// Canonical lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = TokamapError;

    fn from_str(s: &str) -> Result<Self> {
        let data_type = match s.to_ascii_lowercase().as_str() {
            "int8" | "char" => DataType::Int8,
            "int16" | "short" => DataType::Int16,
            "int32" | "int" => DataType::Int32,
            "int64" | "long" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "uint64" => DataType::UInt64,
            "float32" | "float" => DataType::Float32,
            "float64" | "double" => DataType::Float64,
            "string" => DataType::String,
            _ => {
                return Err(TokamapError::InvalidOption {
                    name: "datatype".to_string(),
                    value: s.to_string(),
                })
            }
        };
        Ok(data_type)
    }
}

/// A numeric element that can be stored in a [`TypedBuffer`].
pub trait Element: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Tag stored alongside the bytes.
    const DATA_TYPE: DataType;
    /// Size in bytes.
    const SIZE: usize;

    /// Append the native-endian bytes of `self`.
    fn write_ne(self, out: &mut Vec<u8>);
    /// Read one element from exactly `SIZE` native-endian bytes.
    fn read_ne(bytes: &[u8]) -> Self;
    /// Lossy widening to `f64`.
    fn to_f64(self) -> f64;
    /// Narrowing from `f64`; integers round to nearest and saturate.
    fn from_f64(value: f64) -> Self;
    /// `self * scale + offset` in the element type.
    ///
    /// Integers stay exact for integral factors: the product is taken in
    /// `i128`, the offset is rounded to nearest, and the result saturates.
    /// A fractional factor goes through `f64`.
    fn scale_offset(self, scale: f64, offset: f64) -> Self;
    /// Parse the whole of `s`; any unparsed suffix is a failure.
    fn parse_strict(s: &str) -> Option<Self>;
}

macro_rules! impl_element {
    ($t:ty, $tag:ident, int) => {
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$tag;
            const SIZE: usize = std::mem::size_of::<$t>();

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(value: f64) -> Self {
                value.round() as $t
            }
            fn scale_offset(self, scale: f64, offset: f64) -> Self {
                if scale.fract() != 0.0 {
                    return Self::from_f64(self.to_f64() * scale + offset);
                }
                let wide = i128::from(self)
                    .saturating_mul(scale as i128)
                    .saturating_add(offset.round() as i128);
                <$t>::try_from(wide).unwrap_or(if wide < 0 { <$t>::MIN } else { <$t>::MAX })
            }
            fn parse_strict(s: &str) -> Option<Self> {
                s.parse::<$t>().ok()
            }
        }
    };
    ($t:ty, $tag:ident, float) => {
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$tag;
            const SIZE: usize = std::mem::size_of::<$t>();

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(value: f64) -> Self {
                value as $t
            }
            fn scale_offset(self, scale: f64, offset: f64) -> Self {
                Self::from_f64(self.to_f64() * scale + offset)
            }
            fn parse_strict(s: &str) -> Option<Self> {
                s.parse::<$t>().ok()
            }
        }
    };
}

impl_element!(i8, Int8, int);
impl_element!(i16, Int16, int);
impl_element!(i32, Int32, int);
impl_element!(i64, Int64, int);
impl_element!(u8, UInt8, int);
impl_element!(u16, UInt16, int);
impl_element!(u32, UInt32, int);
impl_element!(u64, UInt64, int);
impl_element!(f32, Float32, float);
impl_element!(f64, Float64, float);

/// Run `$body` with `$T` bound to the Rust type matching a numeric [`DataType`],
/// or evaluate `$string` for [`DataType::String`].
macro_rules! with_element_type {
    ($data_type:expr, $T:ident => $body:expr, string => $string:expr) => {
        match $data_type {
            $crate::buffer::DataType::Int8 => {
                type $T = i8;
                $body
            }
            $crate::buffer::DataType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::buffer::DataType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::buffer::DataType::Int64 => {
                type $T = i64;
                $body
            }
            $crate::buffer::DataType::UInt8 => {
                type $T = u8;
                $body
            }
            $crate::buffer::DataType::UInt16 => {
                type $T = u16;
                $body
            }
            $crate::buffer::DataType::UInt32 => {
                type $T = u32;
                $body
            }
            $crate::buffer::DataType::UInt64 => {
                type $T = u64;
                $body
            }
            $crate::buffer::DataType::Float32 => {
                type $T = f32;
                $body
            }
            $crate::buffer::DataType::Float64 => {
                type $T = f64;
                $body
            }
            $crate::buffer::DataType::String => $string,
        }
    };
}
pub(crate) use with_element_type;

/// Tagged byte buffer carrying a resolved numeric or string result.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedBuffer {
    bytes: Vec<u8>,
    data_type: DataType,
    shape: Vec<usize>,
    len: usize,
}

impl TypedBuffer {
    /// A rank-0 buffer holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut bytes = Vec::with_capacity(T::SIZE);
        value.write_ne(&mut bytes);
        Self {
            bytes,
            data_type: T::DATA_TYPE,
            shape: Vec::new(),
            len: 1,
        }
    }

    /// A rank-1 buffer holding `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let len = values.len();
        Self::encode(&values, vec![len])
    }

    /// A buffer of arbitrary rank. The product of `shape` must equal `values.len()`.
    pub fn with_shape<T: Element>(values: &[T], shape: Vec<usize>) -> Result<Self> {
        check_shape(values.len(), &shape)?;
        Ok(Self::encode(values, shape))
    }

    /// A rank-0 string buffer.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            bytes: value.into().into_bytes(),
            data_type: DataType::String,
            shape: Vec::new(),
            len: 1,
        }
    }

    /// Build a numeric buffer of `data_type` from `f64` values.
    ///
    /// An empty `shape` produces a scalar and requires exactly one value.
    pub fn from_f64_values(data_type: DataType, values: &[f64], shape: Vec<usize>) -> Result<Self> {
        check_shape(values.len(), &shape)?;
        with_element_type!(data_type, T => {
            let converted: Vec<T> = values.iter().map(|&v| T::from_f64(v)).collect();
            Ok(Self::encode(&converted, shape))
        }, string => Err(TokamapError::UnsupportedType {
            operation: "from_f64_values",
            data_type,
        }))
    }

    /// Wrap raw native-endian bytes, checking the length invariant.
    pub fn from_raw(bytes: Vec<u8>, data_type: DataType, shape: Vec<usize>) -> Result<Self> {
        let Some(size) = data_type.size_of() else {
            let text = String::from_utf8(bytes)
                .map_err(|e| TokamapError::Parse(format!("string buffer is not UTF-8: {e}")))?;
            return Ok(Self::from_string(text));
        };
        let len: usize = shape.iter().product();
        if bytes.len() != len * size {
            return Err(TokamapError::InvalidRequest(format!(
                "{} bytes cannot hold {} elements of {}",
                bytes.len(),
                len,
                data_type
            )));
        }
        Ok(Self {
            bytes,
            data_type,
            shape,
            len,
        })
    }

    fn encode<T: Element>(values: &[T], shape: Vec<usize>) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
        for &value in values {
            value.write_ne(&mut bytes);
        }
        Self {
            bytes,
            data_type: T::DATA_TYPE,
            shape,
            len: values.len(),
        }
    }

    /// Element type tag.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of dimensions (0 for scalars).
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of each dimension, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer, returning its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The string payload, if this is a string buffer.
    pub fn as_str(&self) -> Option<&str> {
        match self.data_type {
            DataType::String => std::str::from_utf8(&self.bytes).ok(),
            _ => None,
        }
    }

    /// Decode all elements as `T`. Fails if `T` does not match the element type.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        if T::DATA_TYPE != self.data_type {
            return Err(TokamapError::UnsupportedType {
                operation: "values",
                data_type: self.data_type,
            });
        }
        Ok(self.bytes.chunks_exact(T::SIZE).map(T::read_ne).collect())
    }

    /// Decode all elements, widening to `f64`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        with_element_type!(self.data_type, T => {
            Ok(self.values::<T>()?.into_iter().map(Element::to_f64).collect())
        }, string => Err(TokamapError::UnsupportedType {
            operation: "to_f64_vec",
            data_type: self.data_type,
        }))
    }

    /// Apply `f` to every element in place.
    pub(crate) fn map_in_place<T: Element>(&mut self, f: impl Fn(T) -> T) -> Result<()> {
        let values = self.values::<T>()?;
        self.bytes.clear();
        for value in values {
            f(value).write_ne(&mut self.bytes);
        }
        Ok(())
    }
}

fn check_shape(len: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(TokamapError::InvalidRequest(format!(
            "shape {:?} does not match {} elements",
            shape, len
        )));
    }
    Ok(())
}

fn write_summary<T: Element>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    f.write_str("[")?;
    if values.len() <= 2 * DISPLAY_EDGE {
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
    } else {
        for v in &values[..DISPLAY_EDGE] {
            write!(f, "{v}, ")?;
        }
        f.write_str("...")?;
        for v in &values[values.len() - DISPLAY_EDGE..] {
            write!(f, ", {v}")?;
        }
    }
    f.write_str("]")
}

impl fmt::Display for TypedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?} ", self.data_type, self.shape)?;
        with_element_type!(self.data_type, T => {
            match self.values::<T>() {
                Ok(values) => write_summary(f, &values),
                Err(_) => f.write_str("<invalid>"),
            }
        }, string => write!(f, "{:?}", self.as_str().unwrap_or("<invalid utf-8>")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_length_matches_element_count_for_every_numeric_type() {
        for data_type in DataType::ALL.into_iter().filter(|t| t.is_numeric()) {
            let buffer =
                TypedBuffer::from_f64_values(data_type, &[1.0, 2.0, 3.0], vec![3]).unwrap();
            assert_eq!(buffer.data_type(), data_type);
            assert_eq!(buffer.len(), 3);
            assert_eq!(buffer.bytes().len(), 3 * data_type.size_of().unwrap());
            assert_eq!(buffer.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn scalar_has_rank_zero() {
        let buffer = TypedBuffer::scalar(42i32);
        assert_eq!(buffer.rank(), 0);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.values::<i32>().unwrap(), vec![42]);
    }

    #[test]
    fn values_rejects_mismatched_type() {
        let buffer = TypedBuffer::from_vec(vec![1.0f32, 2.0]);
        assert!(buffer.values::<f64>().is_err());
    }

    #[test]
    fn with_shape_checks_product() {
        assert!(TypedBuffer::with_shape(&[1u16, 2, 3, 4, 5, 6], vec![2, 3]).is_ok());
        assert!(TypedBuffer::with_shape(&[1u16, 2, 3], vec![2, 3]).is_err());
    }

    #[test]
    fn from_raw_enforces_byte_length() {
        assert!(TypedBuffer::from_raw(vec![0; 8], DataType::Int32, vec![2]).is_ok());
        assert!(TypedBuffer::from_raw(vec![0; 7], DataType::Int32, vec![2]).is_err());
    }

    #[test]
    fn integer_conversion_rounds_and_saturates() {
        assert_eq!(i32::from_f64(2.6), 3);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-4.0), 0);
    }

    #[test]
    fn parse_strict_rejects_trailing_garbage() {
        assert_eq!(i32::parse_strict("12"), Some(12));
        assert_eq!(i32::parse_strict("12abc"), None);
        assert_eq!(f64::parse_strict("1.5e3"), Some(1500.0));
        assert_eq!(f32::parse_strict("1.5 "), None);
    }

    #[test]
    fn data_type_names_round_trip() {
        for data_type in DataType::ALL {
            assert_eq!(data_type.name().parse::<DataType>().unwrap(), data_type);
        }
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::Float64);
        assert!("complex".parse::<DataType>().is_err());
    }

    #[test]
    fn display_truncates_long_buffers() {
        let buffer = TypedBuffer::from_vec((0..20).collect::<Vec<i64>>());
        let text = buffer.to_string();
        assert!(text.starts_with("int64[20] [0, 1, 2, 3, 4, ..."));
        assert!(text.ends_with("19]"));
        assert_eq!(TypedBuffer::from_string("ip").to_string(), "string[] \"ip\"");
    }
}
