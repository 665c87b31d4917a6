//! Request surface of the mapping engine.
//!
//! An [`Engine`] owns the [`MappingRegistry`], the optional result cache and the
//! registered data sources and custom handlers. Hosts build a [`Request`] and
//! call [`Engine::resolve`]:
//!
//! ```no_run
//! use tokamap::{DataType, Engine, EngineConfig, Request};
//!
//! # fn main() -> tokamap::Result<()> {
//! let engine = Engine::new(EngineConfig::new("/opt/mappings").with_cache(100, 10))?;
//! let request = Request::new("MASTU", "magnetics/flux_loop[3]/flux/data")
//!     .with_shot(45272)
//!     .with_data_type(DataType::Float64)
//!     .with_rank(1);
//!
//! match engine.resolve(&request)? {
//!     Some(buffer) => println!("{buffer}"),
//!     None => println!("no mapping configured"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Resolution is `&self` and may run concurrently from many threads. The first
//! request for a device loads it; later requests share the loaded snapshot.

use parking_lot::RwLock;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::buffer::{DataType, TypedBuffer};
use crate::cache::{RamCache, SharedCache};
use crate::config::EngineConfig;
use crate::error::{Result, TokamapError};
use crate::mapping::{CustomHandler, DataSource, MapArguments, Providers, RequestScope};
use crate::path::{generate_map_path, RequestPath};
use crate::registry::MappingRegistry;

/// Option names interpreted by [`Request::with_options`] instead of being passed
/// through to the attributes.
const RANK_OPTION: &str = "rank";
const DATATYPE_OPTION: &str = "datatype";
const SHOT_OPTION: &str = "shot";

/// One request for a quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Device name, case-insensitive.
    pub device: String,
    /// Request path, `<ids>/<token>/...` with `[n]` indices.
    pub path: String,
    /// Shot number; `None` selects the shot-independent configuration.
    pub shot: Option<i64>,
    /// Element type the host expects.
    pub data_type: Option<DataType>,
    /// Rank the host expects.
    pub rank: usize,
    /// Extra options merged into the attributes under their own names.
    pub options: BTreeMap<String, String>,
}

impl Request {
    /// A request with no shot, type, rank or options.
    pub fn new(device: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            path: path.into(),
            shot: None,
            data_type: None,
            rank: 0,
            options: BTreeMap::new(),
        }
    }

    /// Build a request from host key/value options.
    ///
    /// `shot`, `rank` and `datatype` are interpreted and must be well formed;
    /// every option, including `shot`, is also passed through to the attributes.
    pub fn with_options<I, K, V>(
        device: impl Into<String>,
        path: impl Into<String>,
        options: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = Self::new(device, path);
        for (name, value) in options {
            let (name, value) = (name.into(), value.into());
            match name.as_str() {
                SHOT_OPTION => request.shot = Some(parse_option(&name, &value)?),
                RANK_OPTION => {
                    request.rank = parse_option(&name, &value)?;
                    continue;
                }
                DATATYPE_OPTION => {
                    request.data_type = Some(value.parse()?);
                    continue;
                }
                _ => {}
            }
            request.options.insert(name, value);
        }
        Ok(request)
    }

    /// Request a specific shot.
    pub fn with_shot(mut self, shot: i64) -> Self {
        self.shot = Some(shot);
        self
    }

    /// Request a specific element type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Request a specific rank.
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    /// Add an option merged into the attributes.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }
}

fn parse_option<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| TokamapError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Integer-looking option values become numbers, everything else stays text.
fn option_value(value: &str) -> Value {
    match value.trim().parse::<i64>() {
        Ok(number) => Value::Number(Number::from(number)),
        Err(_) => Value::String(value.to_string()),
    }
}

/// The mapping engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: MappingRegistry,
    cache: Option<SharedCache>,
    providers: RwLock<Arc<Providers>>,
}

impl Engine {
    /// Create an engine. Devices are loaded lazily, on first request.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let cache = config
            .cache
            .enabled
            .then(|| RamCache::shared(config.cache.max_items, config.cache.drop_items));
        let registry = MappingRegistry::new(&config.mapping_dir, &config.dd_version, cache.clone());
        info!(
            dir = %config.mapping_dir.display(),
            dd_version = %config.dd_version,
            cache = config.cache.enabled,
            "Mapping engine created"
        );
        Ok(Self {
            config,
            registry,
            cache,
            providers: RwLock::new(Arc::new(Providers::default())),
        })
    }

    /// Settings the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The device registry.
    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    /// The shared result cache, if enabled.
    pub fn cache(&self) -> Option<&SharedCache> {
        self.cache.as_ref()
    }

    /// Register the data source serving `PLUGIN` mappings named `name`.
    pub fn register_data_source(&self, name: &str, source: Arc<dyn DataSource>) {
        Arc::make_mut(&mut self.providers.write()).register_data_source(name, source);
        debug!(plugin = %name.to_uppercase(), "Registered data source");
    }

    /// Register the handler serving `CUSTOM` mappings tagged `custom_type`.
    pub fn register_custom_handler(&self, custom_type: &str, handler: Arc<dyn CustomHandler>) {
        Arc::make_mut(&mut self.providers.write()).register_custom_handler(custom_type, handler);
        debug!(custom_type = %custom_type, "Registered custom handler");
    }

    /// Point the engine at another mapping tree. Loaded devices and cached results are dropped.
    pub fn set_mapping_dir(&self, mapping_dir: impl Into<PathBuf>) {
        self.registry.set_mapping_dir(mapping_dir);
        self.clear_cache();
    }

    /// Drop every loaded device and cached result.
    pub fn reset(&self) {
        self.registry.reset();
        self.clear_cache();
    }

    /// Names of the loaded devices.
    pub fn loaded_devices(&self) -> Vec<String> {
        self.registry.loaded_devices()
    }

    /// Whether `device` has been loaded.
    pub fn is_loaded(&self, device: &str) -> bool {
        self.registry.is_loaded(device)
    }

    fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    /// Resolve a request.
    ///
    /// Returns `Ok(None)` when nothing is configured for the request: unknown
    /// quantity group, no applicable shot partition, or no matching mapping key.
    /// Configuration load failures and evaluation failures are errors.
    #[instrument(
        skip(self, request),
        fields(device = %request.device, path = %request.path, shot = ?request.shot)
    )]
    pub fn resolve(&self, request: &Request) -> Result<Option<TypedBuffer>> {
        let path = RequestPath::parse(&request.path)?;

        let selection = self
            .registry
            .read_mappings(&request.device, &path.ids, request.shot)?;
        let Some(selection) = selection else {
            return Ok(None);
        };

        let Some(key) = generate_map_path(&path, selection.mappings()) else {
            debug!(ids = %path.ids, "No mapping found");
            return Ok(None);
        };
        let Some(mapping) = selection.mappings().get(&key) else {
            return Ok(None);
        };

        let attributes = request_attributes(selection.attributes(), &path.indices, request);
        let providers = self.providers.read().clone();
        let device = request.device.to_lowercase();
        let concrete = format!("{}/{}", path.ids, path.concrete_path());
        let args = MapArguments::new(
            selection.mappings(),
            &attributes,
            path.signal(),
            request.data_type,
            request.rank,
            &providers,
        )
        .with_scope(RequestScope {
            device: &device,
            path: &concrete,
            shot: request.shot,
            partition: selection.shot(),
        });

        debug!(
            key = %key,
            kind = %mapping.kind(),
            partition = selection.shot(),
            "Resolving"
        );
        let buffer = mapping.resolve(&args)?;
        debug!(result = %buffer, "Resolved");
        Ok(Some(buffer))
    }
}

/// Copy of the partition attributes with the request indices, shot and options merged in.
fn request_attributes(base: &Value, indices: &[usize], request: &Request) -> Value {
    let mut attributes = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    attributes.insert(
        "indices".to_string(),
        Value::Array(indices.iter().map(|&i| Value::from(i)).collect()),
    );
    if let Some(shot) = request.shot {
        attributes.insert(SHOT_OPTION.to_string(), Value::from(shot));
    }
    for (name, value) in &request.options {
        attributes.insert(name.clone(), option_value(value));
    }
    Value::Object(attributes)
}
