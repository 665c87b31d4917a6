//! `EXPR` mappings: arithmetic over bound parameters.
//!
//! Expressions use `evalexpr` syntax (`a * 2 + b`). Every parameter is bound
//! either to another entry of the table or to a rendered attribute template.
//! Array-valued parameters are evaluated element by element; scalars broadcast.

use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value as ExprValue,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::MapArguments;
use crate::buffer::{DataType, TypedBuffer};
use crate::error::{Result, TokamapError};
use crate::template;

/// A compiled expression and its parameter bindings.
#[derive(Debug, Clone)]
pub struct ExprMapping {
    expression: String,
    tree: Node,
    parameters: BTreeMap<String, String>,
}

/// Values bound to one parameter.
struct Binding {
    values: Vec<f64>,
    is_array: bool,
}

impl ExprMapping {
    /// Compile `expression`. Syntax errors are reported here, at load time.
    pub fn new(
        expression: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Result<Self> {
        let expression = expression.into();
        let tree = build_operator_tree(&expression)
            .map_err(|e| TokamapError::Expression(format!("cannot compile '{expression}': {e}")))?;
        Ok(Self {
            expression,
            tree,
            parameters,
        })
    }

    /// Source text of the expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Parameter name to binding text.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Bind the parameters and evaluate.
    ///
    /// The result has the requested numeric element type, `float64` otherwise.
    /// It is a scalar unless at least one parameter is bound to an array.
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        let bindings = self
            .parameters
            .iter()
            .map(|(name, source)| Ok((name.as_str(), self.bind(source, args)?)))
            .collect::<Result<Vec<_>>>()?;

        let is_array = bindings.iter().any(|(_, b)| b.is_array);
        let len = self.common_length(&bindings)?;
        let mut values = Vec::with_capacity(len);

        for i in 0..len {
            let mut context = HashMapContext::new();
            for (name, binding) in &bindings {
                let value = if binding.values.len() == 1 {
                    binding.values[0]
                } else {
                    binding.values[i]
                };
                context
                    .set_value((*name).to_string(), ExprValue::Float(value))
                    .map_err(|e| TokamapError::Expression(e.to_string()))?;
            }
            let value = self.tree.eval_number_with_context(&context).map_err(|e| {
                TokamapError::Expression(format!("evaluating '{}': {e}", self.expression))
            })?;
            values.push(value);
        }
        debug!(expression = %self.expression, elements = values.len(), "Evaluated expression");

        let data_type = args
            .data_type
            .filter(|t| t.is_numeric())
            .unwrap_or(DataType::Float64);
        let shape = if is_array { vec![values.len()] } else { Vec::new() };
        TypedBuffer::from_f64_values(data_type, &values, shape)
    }

    fn bind(&self, source: &str, args: &MapArguments<'_>) -> Result<Binding> {
        if args.entries.contains_key(source) {
            trace!(entry = %source, "Binding parameter to mapping entry");
            let buffer = args.delegate(source)?;
            return Ok(Binding {
                values: buffer.to_f64_vec()?,
                is_array: buffer.rank() > 0,
            });
        }

        let rendered = template::render_twice(source, args.attributes)?;
        let text = rendered.trim();
        let parse = |s: &str| {
            s.trim().parse::<f64>().map_err(|_| {
                TokamapError::Expression(format!(
                    "parameter '{source}' rendered to '{rendered}', which is not a number"
                ))
            })
        };

        match text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            Some(inner) if inner.trim().is_empty() => Ok(Binding {
                values: Vec::new(),
                is_array: true,
            }),
            Some(inner) => Ok(Binding {
                values: inner.split(',').map(parse).collect::<Result<_>>()?,
                is_array: true,
            }),
            None => Ok(Binding {
                values: vec![parse(text)?],
                is_array: false,
            }),
        }
    }

    /// Length shared by every array binding; scalars broadcast.
    fn common_length(&self, bindings: &[(&str, Binding)]) -> Result<usize> {
        let mut len: Option<usize> = None;
        for (name, binding) in bindings {
            if !binding.is_array && binding.values.len() == 1 {
                continue;
            }
            match len {
                None => len = Some(binding.values.len()),
                Some(expected) if expected != binding.values.len() => {
                    return Err(TokamapError::Expression(format!(
                        "parameter '{name}' has {} elements, expected {expected}",
                        binding.values.len()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(len.unwrap_or(1))
    }
}
