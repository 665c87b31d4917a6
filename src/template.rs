//! Minimal template rendering against a JSON attribute document.
//!
//! Placeholders take the form `{{ name }}`. A name is a dotted path into the
//! document; array elements are addressed either as `indices.0` or `indices[0]`.
//! Strings are substituted verbatim, other values as their JSON text.
//! Referencing a name that is not in the document is an error.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{Result, TokamapError};

/// Matches `{{ placeholder }}`.
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("Invalid placeholder regex"));

/// Whether `text` contains any placeholder.
pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER_REGEX.is_match(text)
}

/// Substitute every placeholder in `template` with its value from `data`.
pub fn render(template: &str, data: &Value) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for capture in PLACEHOLDER_REGEX.captures_iter(template) {
        let Some(whole) = capture.get(0) else {
            continue;
        };
        let name = &capture[1];
        let value = lookup(data, name).ok_or_else(|| {
            TokamapError::Template(format!(
                "variable '{name}' not found while rendering '{template}'"
            ))
        })?;
        result.push_str(&template[last..whole.start()]);
        result.push_str(&value_to_text(value));
        last = whole.end();
    }
    result.push_str(&template[last..]);

    Ok(result)
}

/// Render twice, so a first-pass substitution may itself contain placeholders.
pub fn render_twice(template: &str, data: &Value) -> Result<String> {
    let first = render(template, data)?;
    if has_placeholders(&first) {
        render(&first, data)
    } else {
        Ok(first)
    }
}

/// Resolve a dotted / indexed path such as `PLUGIN_CONFIG.UDA.ARGS` or `indices[1]`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = data;
    for segment in path.split('.') {
        let (name, brackets) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = step(current, name)?;
        }
        for index in brackets.split(']').filter(|s| !s.is_empty()) {
            let index = index.strip_prefix('[')?.trim();
            current = current.get(index.parse::<usize>().ok()?)?;
        }
    }
    Some(current)
}

fn step<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(name),
        Value::Array(items) => items.get(name.parse::<usize>().ok()?),
        _ => None,
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
