//! `VALUE` mappings: literals stored in the mapping document.

use serde_json::{Number, Value};
use tracing::{debug, trace};

use super::MapArguments;
use crate::buffer::{with_element_type, DataType, Element, TypedBuffer};
use crate::error::{Result, TokamapError};
use crate::template;

/// A literal JSON scalar or array.
///
/// Numbers and booleans pass through as typed scalars. Strings are rendered
/// against the request attributes and then parsed as the requested element
/// type; if parsing fails the rendered text is returned as a string buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMapping {
    value: Value,
}

impl ValueMapping {
    /// Wrap the `VALUE` field of a mapping entry.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The stored literal.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Produce the literal for the current request.
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        match &self.value {
            Value::Array(items) => literal_array(items),
            Value::Number(number) => Ok(literal_number(number)),
            Value::Bool(flag) => Ok(TypedBuffer::scalar(u8::from(*flag))),
            Value::String(text) => {
                let rendered = template::render_twice(text, args.attributes)?;
                Ok(parse_rendered(&rendered, args.data_type, args.rank))
            }
            Value::Null => Err(TokamapError::Mapping("VALUE mapping holds null".to_string())),
            Value::Object(_) => Err(TokamapError::Mapping(
                "VALUE mapping holds an object, only scalars and numeric arrays are supported"
                    .to_string(),
            )),
        }
    }
}

fn literal_number(number: &Number) -> TypedBuffer {
    if let Some(int) = number.as_i64() {
        match i32::try_from(int) {
            Ok(small) => TypedBuffer::scalar(small),
            Err(_) => TypedBuffer::scalar(int),
        }
    } else if let Some(unsigned) = number.as_u64() {
        TypedBuffer::scalar(unsigned)
    } else {
        TypedBuffer::scalar(number.as_f64().unwrap_or(f64::NAN))
    }
}

fn literal_array(items: &[Value]) -> Result<TypedBuffer> {
    if items.is_empty() {
        return Ok(TypedBuffer::from_vec(Vec::<f64>::new()));
    }
    if items.iter().any(|item| !item.is_number()) {
        return Err(TokamapError::Mapping(
            "VALUE arrays must hold numbers only".to_string(),
        ));
    }

    let ints: Option<Vec<i64>> = items.iter().map(Value::as_i64).collect();
    if let Some(ints) = ints {
        let small: std::result::Result<Vec<i32>, _> =
            ints.iter().map(|&v| i32::try_from(v)).collect();
        return Ok(match small {
            Ok(small) => TypedBuffer::from_vec(small),
            Err(_) => TypedBuffer::from_vec(ints),
        });
    }

    let floats: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    Ok(TypedBuffer::from_vec(floats))
}

/// Parse rendered text as the requested type, or fall back to a string buffer.
fn parse_rendered(rendered: &str, data_type: Option<DataType>, rank: usize) -> TypedBuffer {
    let Some(data_type) = data_type.filter(|t| t.is_numeric()) else {
        return TypedBuffer::from_string(rendered);
    };

    let parsed = with_element_type!(data_type, T => {
        if rank == 0 {
            T::parse_strict(rendered).map(TypedBuffer::scalar)
        } else {
            parse_array::<T>(rendered).map(TypedBuffer::from_vec)
        }
    }, string => None);

    match parsed {
        Some(buffer) => {
            trace!(%buffer, "Parsed VALUE literal");
            buffer
        }
        None => {
            debug!(
                text = %rendered,
                %data_type,
                rank,
                "VALUE literal is not a valid number, returning it as a string"
            );
            TypedBuffer::from_string(rendered)
        }
    }
}

/// Parse `"[a, b, c]"`. Every element must parse completely.
fn parse_array<T: Element>(text: &str) -> Option<Vec<T>> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    inner
        .split(',')
        .map(|element| T::parse_strict(element.trim()))
        .collect()
}
