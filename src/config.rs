//! Engine settings loaded with Figment.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. environment variables prefixed with `TOKAMAP_` (nested keys separated by `__`).
//!
//! # Example
//! ```no_run
//! use tokamap::config::EngineConfig;
//!
//! // TOKAMAP_MAPPING_DIR=/opt/mappings TOKAMAP_CACHE__ENABLED=true
//! let config = EngineConfig::load_from("tokamap.toml")?;
//! config.validate()?;
//! println!("Mappings: {}", config.mapping_dir.display());
//! # Ok::<(), tokamap::TokamapError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_DROP_ITEMS, DEFAULT_MAX_ITEMS};
use crate::error::{Result, TokamapError};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "TOKAMAP_";

/// Default data-dictionary version selecting the manifest entry.
pub const DEFAULT_DD_VERSION: &str = "3.39.0";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory holding one sub-directory per device.
    #[serde(default)]
    pub mapping_dir: PathBuf,
    /// Data-dictionary version used to read device manifests.
    #[serde(default = "default_dd_version")]
    pub dd_version: String,
    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Result cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether plugin results are cached.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of cached results.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Number of results evicted together when the cache is full.
    #[serde(default = "default_drop_items")]
    pub drop_items: usize,
}

// Default value functions
fn default_dd_version() -> String {
    DEFAULT_DD_VERSION.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_drop_items() -> usize {
    DEFAULT_DROP_ITEMS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_items: default_max_items(),
            drop_items: default_drop_items(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mapping_dir: PathBuf::new(),
            dd_version: default_dd_version(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `mapping_dir` set.
    pub fn new(mapping_dir: impl Into<PathBuf>) -> Self {
        Self {
            mapping_dir: mapping_dir.into(),
            ..Self::default()
        }
    }

    /// Enable the result cache with the given limits.
    pub fn with_cache(mut self, max_items: usize, drop_items: usize) -> Self {
        self.cache = CacheConfig {
            enabled: true,
            max_items,
            drop_items,
        };
        self
    }

    /// The provider stack: defaults, then `path` if it exists, then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from defaults and the environment only.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment(None))
    }

    /// Load from defaults, the TOML file at `path` and the environment.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_figment(Self::figment(Some(path.as_ref())))
    }

    /// Extract from an arbitrary provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        if self.mapping_dir.as_os_str().is_empty() {
            return Err(invalid("mapping_dir", "mapping directory must be set"));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "log_level",
                format!(
                    "invalid log_level '{}', must be one of: {}",
                    self.log_level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        if self.cache.max_items == 0 {
            return Err(invalid("cache.max_items", "cache.max_items must be at least 1"));
        }
        if self.cache.drop_items == 0 || self.cache.drop_items > self.cache.max_items {
            return Err(invalid(
                "cache.drop_items",
                format!(
                    "cache.drop_items must be between 1 and max_items ({}), got {}",
                    self.cache.max_items, self.cache.drop_items
                ),
            ));
        }

        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> TokamapError {
    TokamapError::config(format!("<settings:{key}>"), message)
}
