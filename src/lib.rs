//! # tokamap
//!
//! Resolves data-dictionary request paths for fusion devices into typed results,
//! driven by declarative JSON mapping documents.
//!
//! A request such as `magnetics/flux_loop[3]/flux/data` for device `MASTU` at
//! shot 45272 is answered in four steps:
//!
//! 1. the device's mapping documents are loaded on first use ([`registry`]),
//! 2. the shot partition that applies is selected ([`registry::selector`]),
//! 3. the path is generalised to `flux_loop[#]/flux` and matched against the
//!    mapping table ([`path`]),
//! 4. the matched strategy produces a [`TypedBuffer`] ([`mapping`]), possibly
//!    through the result [`cache`] and the numeric [`transform`]s.
//!
//! ## Crate Structure
//!
//! - **`buffer`**: the tagged result buffer and its element types.
//! - **`cache`**: bounded FIFO result cache with batch eviction.
//! - **`config`**: engine settings loaded with Figment.
//! - **`engine`**: the request surface, [`Engine`] and [`Request`].
//! - **`error`**: [`TokamapError`] and the crate [`Result`] alias.
//! - **`logging`**: tracing subscriber setup for binaries.
//! - **`mapping`**: the five mapping strategies and the host extension traits.
//! - **`path`**: index generalisation and mapping-key fallback matching.
//! - **`registry`**: lazy per-device loading and shot selection.
//! - **`template`**: `{{ name }}` rendering against attribute documents.
//! - **`transform`**: scale, offset and strided subsetting.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod path;
pub mod registry;
pub mod template;
pub mod transform;

pub use buffer::{DataType, Element, TypedBuffer};
pub use cache::{RamCache, SharedCache};
pub use config::{CacheConfig, EngineConfig};
pub use engine::{Engine, Request};
pub use error::{Result, TokamapError};
pub use mapping::{CustomHandler, DataSource, MapArguments, Mapping, PluginCall, RequestScope};
pub use path::SignalKind;
