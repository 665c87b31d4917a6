//! Request path generalisation and mapping-key matching.
//!
//! Request paths are `/`-separated tokens, with `[n]` indices on repeated
//! elements, for example `magnetics/flux_loop[3]/flux/data`. Mapping documents
//! are keyed by the *generalised* form, where every index is replaced by `[#]`
//! (`flux_loop[#]/flux`), so one rule can serve every element of an array of
//! structures. Fully concrete keys are accepted as a fallback.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{Result, TokamapError};

/// Matches a bracketed index such as `[12]`.
static PATH_INDEX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("Invalid path index regex"));

/// Placeholder substituted for every bracketed index.
pub const WILDCARD: &str = "[#]";

/// Kind of signal requested, deduced from the final path token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Any other terminal token.
    Default,
    /// `.../data`
    Data,
    /// `.../time`
    Time,
    /// Any terminal token containing `error` (`error_upper`, `error_lower`, ...).
    Error,
    /// Empty terminal token; never mapped.
    Invalid,
}

impl SignalKind {
    /// Classify the final token of a request path.
    pub fn from_token(token: &str) -> Self {
        if token.is_empty() {
            SignalKind::Invalid
        } else if token == "data" {
            SignalKind::Data
        } else if token == "time" {
            SignalKind::Time
        } else if token.contains("error") {
            SignalKind::Error
        } else {
            SignalKind::Default
        }
    }

    /// Path suffix for the kinds that have one.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            SignalKind::Data => Some("data"),
            SignalKind::Time => Some("time"),
            _ => None,
        }
    }
}

/// Capture every `[n]` index, in order, and replace it with [`WILDCARD`].
///
/// Returns the captured indices and the generalised tokens.
pub fn extract_indices<S: AsRef<str>>(tokens: &[S]) -> Result<(Vec<usize>, Vec<String>)> {
    let mut indices = Vec::new();
    let mut generalised = Vec::with_capacity(tokens.len());

    for token in tokens {
        let token = token.as_ref();
        for capture in PATH_INDEX_REGEX.captures_iter(token) {
            let digits = &capture[1];
            let index = digits.parse::<usize>().map_err(|_| {
                TokamapError::InvalidRequest(format!(
                    "index [{digits}] in '{token}' is out of range"
                ))
            })?;
            indices.push(index);
        }
        generalised.push(PATH_INDEX_REGEX.replace_all(token, WILDCARD).into_owned());
    }

    Ok((indices, generalised))
}

/// Put `indices` back into a generalised path, left to right.
///
/// Wildcards beyond the supplied indices are left in place.
pub fn substitute_indices(generalised: &str, indices: &[usize]) -> String {
    let mut result = String::with_capacity(generalised.len());
    let mut rest = generalised;
    let mut remaining = indices.iter();
    while let Some(pos) = rest.find(WILDCARD) {
        let Some(index) = remaining.next() else {
            break;
        };
        result.push_str(&rest[..pos]);
        result.push('[');
        result.push_str(&index.to_string());
        result.push(']');
        rest = &rest[pos + WILDCARD.len()..];
    }
    result.push_str(rest);
    result
}

/// Find the mapping key for a request.
///
/// Candidates are tried in order:
/// 1. the generalised path,
/// 2. the fully concrete path,
/// 3. the generalised path with only its *last* wildcard replaced by the last index.
///
/// `None` means no mapping is configured for the request.
pub fn find_mapping<V>(
    table: &HashMap<String, V>,
    path: &str,
    indices: &[usize],
    full_path: &str,
) -> Option<String> {
    if table.contains_key(path) {
        return Some(path.to_string());
    }

    if table.contains_key(full_path) {
        return Some(full_path.to_string());
    }

    let last = indices.last()?;
    let pos = path.rfind('#')?;
    let mut candidate = String::with_capacity(path.len() + 4);
    candidate.push_str(&path[..pos]);
    candidate.push_str(&last.to_string());
    candidate.push_str(&path[pos + 1..]);

    table.contains_key(&candidate).then_some(candidate)
}

/// A parsed request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// Quantity group named by the leading token.
    pub ids: String,
    /// Generalised tokens after the group name.
    pub tokens: Vec<String>,
    /// Captured indices, left to right.
    pub indices: Vec<usize>,
    /// Concrete tokens after the group name.
    pub concrete: Vec<String>,
}

impl RequestPath {
    /// Split `path` on `/` and generalise its indices. A leading `/` is ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut concrete: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        let ids = concrete.remove(0);
        if ids.is_empty() {
            return Err(TokamapError::InvalidRequest(format!(
                "path '{path}' does not name a quantity group"
            )));
        }
        if PATH_INDEX_REGEX.is_match(&ids) {
            return Err(TokamapError::InvalidRequest(format!(
                "quantity group '{ids}' cannot be indexed"
            )));
        }
        let (indices, tokens) = extract_indices(&concrete)?;
        Ok(Self {
            ids,
            tokens,
            indices,
            concrete,
        })
    }

    /// Signal kind of the final token.
    pub fn signal(&self) -> SignalKind {
        SignalKind::from_token(self.tokens.last().map(String::as_str).unwrap_or(""))
    }

    /// Generalised path after the group name.
    pub fn generalised(&self) -> String {
        self.tokens.join("/")
    }

    /// Concrete path after the group name.
    pub fn concrete_path(&self) -> String {
        self.concrete.join("/")
    }
}

/// Resolve the mapping key for `request` against `table`.
///
/// Invalid requests short-circuit to `None` without consulting the table. For
/// `data` and `time` requests whose full generalised path is not mapped, the
/// terminal token is dropped from both the generalised and the concrete path,
/// so one rule can serve a quantity's data and time arrays.
pub fn generate_map_path<V>(request: &RequestPath, table: &HashMap<String, V>) -> Option<String> {
    let signal = request.signal();
    if signal == SignalKind::Invalid {
        return None;
    }

    let map_path = request.generalised();
    debug!(path = %map_path, ?signal, "Generating map path");
    if table.contains_key(&map_path) {
        return Some(map_path);
    }

    let (tokens, concrete) = match signal {
        SignalKind::Data | SignalKind::Time => (
            &request.tokens[..request.tokens.len() - 1],
            &request.concrete[..request.concrete.len() - 1],
        ),
        _ => (&request.tokens[..], &request.concrete[..]),
    };
    find_mapping(table, &tokens.join("/"), &request.indices, &concrete.join("/"))
}
