//! Mapping strategies.
//!
//! A mapping document entry describes *how* to produce the value of one request
//! path. Five kinds exist, selected by the entry's `MAP_TYPE`:
//!
//! | `MAP_TYPE`  | Strategy              | Produces                                          |
//! |-------------|-----------------------|---------------------------------------------------|
//! | `VALUE`     | [`ValueMapping`]      | a literal, optionally templated and parsed        |
//! | `PLUGIN`    | [`PluginMapping`]     | the result of a registered [`DataSource`]         |
//! | `DIMENSION` | [`DimensionMapping`]  | another entry's value, found by probe name        |
//! | `EXPR`      | [`ExprMapping`]       | an arithmetic expression over bound parameters    |
//! | `CUSTOM`    | [`CustomMapping`]     | the result of a registered [`CustomHandler`]      |
//!
//! All strategies share one contract, [`Mapping::resolve`], which receives the
//! request-scoped [`MapArguments`] and returns a [`TypedBuffer`].

pub mod custom;
pub mod dimension;
pub mod expr;
pub mod plugin;
pub mod value;

pub use custom::{CustomHandler, CustomMapping};
pub use dimension::DimensionMapping;
pub use expr::ExprMapping;
pub use plugin::{DataSource, PluginCall, PluginMapping};
pub use value::ValueMapping;

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::buffer::{DataType, TypedBuffer};
use crate::error::{Result, TokamapError};
use crate::path::SignalKind;
use crate::registry::selector::SHOT_INDEPENDENT;

/// Maximum nesting of mappings that resolve other entries.
pub const MAX_DELEGATION_DEPTH: usize = 8;

/// Mapping key to strategy, for one quantity group and shot partition.
pub type MappingTable = HashMap<String, Mapping>;

/// Discriminator stored under `MAP_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapType {
    /// `VALUE`
    Value,
    /// `PLUGIN`
    Plugin,
    /// `DIMENSION`
    Dimension,
    /// `EXPR`
    Expr,
    /// `CUSTOM`
    Custom,
}

impl MapType {
    /// Parse a `MAP_TYPE` value. Unknown discriminators yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "VALUE" => Some(MapType::Value),
            "PLUGIN" => Some(MapType::Plugin),
            "DIMENSION" => Some(MapType::Dimension),
            "EXPR" => Some(MapType::Expr),
            "CUSTOM" => Some(MapType::Custom),
            _ => None,
        }
    }

    /// The `MAP_TYPE` spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            MapType::Value => "VALUE",
            MapType::Plugin => "PLUGIN",
            MapType::Dimension => "DIMENSION",
            MapType::Expr => "EXPR",
            MapType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured mapping strategy.
#[derive(Debug, Clone)]
pub enum Mapping {
    /// Literal value.
    Value(ValueMapping),
    /// External data source.
    Plugin(PluginMapping),
    /// Dimension lookup by probe name.
    Dimension(DimensionMapping),
    /// Expression over parameters.
    Expr(ExprMapping),
    /// Device-specific handler.
    Custom(CustomMapping),
}

impl Mapping {
    /// Produce the value for the current request.
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        trace!(kind = %self.kind(), depth = args.depth, "Resolving mapping");
        match self {
            Mapping::Value(m) => m.resolve(args),
            Mapping::Plugin(m) => m.resolve(args),
            Mapping::Dimension(m) => m.resolve(args),
            Mapping::Expr(m) => m.resolve(args),
            Mapping::Custom(m) => m.resolve(args),
        }
    }

    /// Strategy kind.
    pub fn kind(&self) -> MapType {
        match self {
            Mapping::Value(_) => MapType::Value,
            Mapping::Plugin(_) => MapType::Plugin,
            Mapping::Dimension(_) => MapType::Dimension,
            Mapping::Expr(_) => MapType::Expr,
            Mapping::Custom(_) => MapType::Custom,
        }
    }
}

/// Host-provided collaborators that strategies call out to.
#[derive(Default, Clone)]
pub struct Providers {
    data_sources: HashMap<String, Arc<dyn DataSource>>,
    custom_handlers: HashMap<String, Arc<dyn CustomHandler>>,
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .field("custom_handlers", &self.custom_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Providers {
    /// Register a data source; names are case-normalised to upper case.
    pub fn register_data_source(&mut self, name: &str, source: Arc<dyn DataSource>) {
        self.data_sources.insert(name.to_uppercase(), source);
    }

    /// Register a handler for a `CUSTO_TYPE` tag.
    pub fn register_custom_handler(&mut self, tag: &str, handler: Arc<dyn CustomHandler>) {
        self.custom_handlers.insert(tag.to_string(), handler);
    }

    /// Look up a data source by (case-insensitive) name.
    pub fn data_source(&self, name: &str) -> Option<&Arc<dyn DataSource>> {
        self.data_sources.get(&name.to_uppercase())
    }

    /// Look up a custom handler by tag.
    pub fn custom_handler(&self, tag: &str) -> Option<&Arc<dyn CustomHandler>> {
        self.custom_handlers.get(tag)
    }
}

/// Identity of the request being resolved, beyond what the attributes carry.
///
/// Plugin results are cached under this scope, so two requests share a cached
/// buffer only when device, concrete path, shot and partition all agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestScope<'a> {
    /// Lower-case device name.
    pub device: &'a str,
    /// Concrete request path, quantity group and indices included.
    pub path: &'a str,
    /// Requested shot.
    pub shot: Option<i64>,
    /// Selected shot partition.
    pub partition: i64,
}

impl Default for RequestScope<'_> {
    fn default() -> Self {
        Self {
            device: "",
            path: "",
            shot: None,
            partition: SHOT_INDEPENDENT,
        }
    }
}

impl fmt::Display for RequestScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@", self.device, self.path)?;
        match self.shot {
            Some(shot) => write!(f, "{shot}")?,
            None => f.write_str("-")?,
        }
        write!(f, "/{}", self.partition)
    }
}

/// Request-scoped arguments handed to every strategy.
#[derive(Debug, Clone, Copy)]
pub struct MapArguments<'a> {
    /// Every mapping of the current group and shot, for back-references.
    pub entries: &'a MappingTable,
    /// Attribute document of the current shot, with `indices` and request options merged in.
    pub attributes: &'a Value,
    /// Kind of signal requested.
    pub signal: SignalKind,
    /// Requested element type, if the caller specified one.
    pub data_type: Option<DataType>,
    /// Requested rank.
    pub rank: usize,
    /// Registered data sources and custom handlers.
    pub providers: &'a Providers,
    /// Device, path and shot of the request.
    pub scope: RequestScope<'a>,
    depth: usize,
}

impl<'a> MapArguments<'a> {
    /// Bundle the arguments for a top-level resolution.
    pub fn new(
        entries: &'a MappingTable,
        attributes: &'a Value,
        signal: SignalKind,
        data_type: Option<DataType>,
        rank: usize,
        providers: &'a Providers,
    ) -> Self {
        Self {
            entries,
            attributes,
            signal,
            data_type,
            rank,
            providers,
            scope: RequestScope::default(),
            depth: 0,
        }
    }

    /// Attach the identity of the request.
    pub fn with_scope(mut self, scope: RequestScope<'a>) -> Self {
        self.scope = scope;
        self
    }

    /// Resolve another entry of the same table.
    ///
    /// Fails if `key` is not mapped or the delegation chain is too deep (a cycle).
    pub fn delegate(&self, key: &str) -> Result<TypedBuffer> {
        if self.depth >= MAX_DELEGATION_DEPTH {
            return Err(TokamapError::Mapping(format!(
                "delegation to '{key}' exceeds depth {MAX_DELEGATION_DEPTH}, the mappings may be cyclic"
            )));
        }
        let mapping = self
            .entries
            .get(key)
            .ok_or_else(|| {
                TokamapError::Mapping(format!("referenced mapping '{key}' does not exist"))
            })?;
        let child = Self {
            depth: self.depth + 1,
            ..*self
        };
        mapping.resolve(&child)
    }

    /// Nesting depth of this resolution.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_type_parses_known_discriminators() {
        for tag in ["VALUE", "PLUGIN", "DIMENSION", "EXPR", "CUSTOM"] {
            assert_eq!(MapType::parse(tag).unwrap().as_str(), tag);
        }
        assert_eq!(MapType::parse("SLICE"), None);
        assert_eq!(MapType::parse("value"), None);
    }

    #[test]
    fn providers_normalise_data_source_names() {
        let mut providers = Providers::default();
        let source: Arc<dyn DataSource> =
            Arc::new(|_: &PluginCall<'_>| Ok::<_, anyhow::Error>(TypedBuffer::scalar(1i32)));
        providers.register_data_source("uda", source);
        assert!(providers.data_source("UDA").is_some());
        assert!(providers.data_source("Uda").is_some());
        assert!(providers.data_source("ppf").is_none());
    }

    #[test]
    fn delegation_detects_cycles() {
        let mut entries = MappingTable::new();
        entries.insert("a".into(), Mapping::Dimension(DimensionMapping::new("b")));
        entries.insert("b".into(), Mapping::Dimension(DimensionMapping::new("a")));
        let attributes = json!({});
        let providers = Providers::default();
        let args =
            MapArguments::new(&entries, &attributes, SignalKind::Default, None, 0, &providers);

        let err = args.delegate("a").unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn delegation_to_missing_entry_fails() {
        let entries = MappingTable::new();
        let attributes = json!({});
        let providers = Providers::default();
        let args = MapArguments::new(&entries, &attributes, SignalKind::Data, None, 0, &providers);
        assert!(args.delegate("nothing").is_err());
    }
}
