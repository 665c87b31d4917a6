//! `PLUGIN` mappings: values read through a host-registered data source.
//!
//! The engine never talks to an experiment database itself. A host registers
//! one [`DataSource`] per plugin name, and every `PLUGIN` entry naming it is
//! resolved by rendering the entry's arguments against the request attributes
//! and handing them to that source. The returned buffer is then sliced, scaled
//! and offset as the entry asks, and memoised in the shared cache when one is
//! configured.

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::MapArguments;
use crate::buffer::{DataType, TypedBuffer};
use crate::cache::SharedCache;
use crate::error::{Result, TokamapError};
use crate::path::SignalKind;
use crate::template;
use crate::transform::{apply_offset, apply_scale, apply_subsetting, parse_slice};

/// Everything a data source receives for one call.
#[derive(Debug, Clone, Copy)]
pub struct PluginCall<'a> {
    /// Upper-case plugin name.
    pub plugin: &'a str,
    /// Function to invoke on the plugin, if the mapping or `PLUGIN_CONFIG` names one.
    pub function: Option<&'a str>,
    /// Arguments with every string rendered against the request attributes.
    pub args: &'a Map<String, Value>,
    /// Kind of signal requested.
    pub signal: SignalKind,
    /// Requested element type.
    pub data_type: Option<DataType>,
    /// Requested rank.
    pub rank: usize,
    /// Attribute document of the request.
    pub attributes: &'a Value,
}

/// A host-provided source of raw data.
pub trait DataSource: Send + Sync {
    /// Fetch the data described by `call`.
    fn get(&self, call: &PluginCall<'_>) -> anyhow::Result<TypedBuffer>;
}

impl<F> DataSource for F
where
    F: Fn(&PluginCall<'_>) -> anyhow::Result<TypedBuffer> + Send + Sync,
{
    fn get(&self, call: &PluginCall<'_>) -> anyhow::Result<TypedBuffer> {
        self(call)
    }
}

/// A call to a named data source with optional post-processing.
#[derive(Debug, Clone)]
pub struct PluginMapping {
    plugin: String,
    function: Option<String>,
    args: Map<String, Value>,
    offset: Option<f64>,
    scale: Option<f64>,
    slice: Option<String>,
    cache: Option<SharedCache>,
}

impl PluginMapping {
    /// Call `plugin` with `args`. The name is normalised to upper case.
    pub fn new(plugin: &str, args: Map<String, Value>) -> Self {
        Self {
            plugin: plugin.to_uppercase(),
            function: None,
            args,
            offset: None,
            scale: None,
            slice: None,
            cache: None,
        }
    }

    /// Add `defaults` for every argument the mapping does not set itself.
    pub fn with_default_args(mut self, defaults: &Map<String, Value>) -> Self {
        for (name, value) in defaults {
            self.args.entry(name.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// Invoke `function` instead of the plugin's default.
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Add `offset` to every element of the result.
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Multiply every element of the result by `scale`.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Subset the result with a slice string such as `"[0:10:2]"`.
    pub fn with_slice(mut self, slice: impl Into<String>) -> Self {
        self.slice = Some(slice.into());
        self
    }

    /// Memoise results in `cache`.
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Upper-case plugin name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Override function, if any.
    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    /// Unrendered arguments.
    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// Offset applied to the result, if any.
    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// Scale applied to the result, if any.
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }

    /// Slice applied to the result, if any.
    pub fn slice(&self) -> Option<&str> {
        self.slice.as_deref()
    }

    /// Fetch from the data source, going through the cache when enabled.
    #[instrument(skip_all, fields(plugin = %self.plugin))]
    pub fn resolve(&self, args: &MapArguments<'_>) -> Result<TypedBuffer> {
        let source = args
            .providers
            .data_source(&self.plugin)
            .ok_or_else(|| TokamapError::UnknownPlugin(self.plugin.clone()))?;

        let rendered = render_args(&self.args, args.attributes)?;
        let key = self.cache_key(&rendered, args);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().copy_out(&key) {
                debug!(key = %key, "Plugin result served from cache");
                return Ok(hit);
            }
        }

        let call = PluginCall {
            plugin: &self.plugin,
            function: self.function.as_deref(),
            args: &rendered,
            signal: args.signal,
            data_type: args.data_type,
            rank: args.rank,
            attributes: args.attributes,
        };
        let mut buffer = source.get(&call).map_err(|reason| TokamapError::Plugin {
            name: self.plugin.clone(),
            reason,
        })?;
        debug!(result = %buffer, "Data source returned");

        self.post_process(&mut buffer)?;

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            if !cache.has(&key) {
                cache.add(key, buffer.clone())?;
            }
        }
        Ok(buffer)
    }

    fn post_process(&self, buffer: &mut TypedBuffer) -> Result<()> {
        let scale = self.scale.unwrap_or(1.0);
        let offset = self.offset.unwrap_or(0.0);

        if let Some(slice) = self.slice.as_deref().filter(|_| buffer.rank() > 0) {
            let dims = parse_slice(slice, buffer.shape())?;
            return apply_subsetting(buffer, &dims, scale, offset);
        }
        if self.scale.is_some() {
            apply_scale(buffer, scale)?;
        }
        if self.offset.is_some() {
            apply_offset(buffer, offset)?;
        }
        Ok(())
    }

    fn cache_key(&self, rendered: &Map<String, Value>, args: &MapArguments<'_>) -> String {
        format!(
            "{}|{}|{}|{}|{:?}|{:?}|{:?}|{:?}|{:?}|{}",
            args.scope,
            self.plugin,
            self.function.as_deref().unwrap_or(""),
            Value::Object(rendered.clone()),
            self.scale,
            self.offset,
            self.slice,
            args.signal,
            args.data_type,
            args.rank,
        )
    }
}

/// Render every string in `args`, recursing into arrays and objects.
fn render_args(args: &Map<String, Value>, attributes: &Value) -> Result<Map<String, Value>> {
    args.iter()
        .map(|(name, value)| Ok((name.clone(), render_value(value, attributes)?)))
        .collect()
}

fn render_value(value: &Value, attributes: &Value) -> Result<Value> {
    Ok(match value {
        Value::String(text) => Value::String(template::render_twice(text, attributes)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, attributes))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(render_args(map, attributes)?),
        other => other.clone(),
    })
}
