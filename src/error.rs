//! Error types for the mapping engine.
//!
//! `TokamapError` is the single error type returned by every fallible operation
//! in the crate. It is built with `thiserror` and falls into three groups:
//!
//! - **Configuration errors** - `Config`, `MissingField`, `Manifest`, `Settings`.
//!   Raised while a device's mapping documents are being loaded. These are fatal
//!   for the request and always name the offending file.
//! - **Evaluation errors** - `Template`, `Expression`, `Parse`, `UnsupportedType`,
//!   `InvalidSubset`, `Plugin`, `UnknownPlugin`, `UnknownCustomType`, `Mapping`.
//!   Raised while a mapping strategy is producing a result.
//! - **Programmer errors** - `DuplicateCacheKey`, `InvalidOption`, `InvalidRequest`.
//!   Raised immediately instead of silently coercing bad input.
//!
//! A request for which no mapping is configured is *not* an error: the engine
//! reports it as `Ok(None)`.

use std::path::PathBuf;
use thiserror::Error;

use crate::buffer::DataType;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, TokamapError>;

/// Primary error type for the mapping engine.
#[derive(Error, Debug)]
pub enum TokamapError {
    /// A mapping document could not be opened or parsed.
    #[error("Configuration error in {}: {message}", path.display())]
    Config {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying failure description.
        message: String,
    },

    /// A mapping entry is missing a field its `MAP_TYPE` requires.
    #[error("Mapping '{key}' in {} is missing field '{field}'", path.display())]
    MissingField {
        /// Mapping document containing the entry.
        path: PathBuf,
        /// Mapping key.
        key: String,
        /// Name of the missing or mistyped field.
        field: &'static str,
    },

    /// The device manifest does not list the configured data-dictionary version.
    #[error("Manifest {} has no entry for data dictionary version '{version}'", path.display())]
    Manifest {
        /// Manifest file path.
        path: PathBuf,
        /// Requested data-dictionary version.
        version: String,
    },

    /// Engine settings could not be extracted.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// Expression compilation or evaluation failed.
    #[error("Expression error: {0}")]
    Expression(String),

    /// A value could not be parsed as the requested element type.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An operation is not defined for the buffer's element type.
    #[error("Operation '{operation}' is not supported for element type {data_type}")]
    UnsupportedType {
        /// Operation that was attempted.
        operation: &'static str,
        /// Element type of the buffer.
        data_type: DataType,
    },

    /// A key was inserted into the result cache twice.
    #[error("Cache key already exists: {0}")]
    DuplicateCacheKey(String),

    /// A request option could not be interpreted.
    #[error("Invalid value '{value}' for option '{name}'")]
    InvalidOption {
        /// Option name.
        name: String,
        /// Raw option value.
        value: String,
    },

    /// A subset descriptor or slice string is inconsistent with the data.
    #[error("Invalid subset: {0}")]
    InvalidSubset(String),

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An external data source reported a failure.
    #[error("Plugin '{name}' failed: {reason:#}")]
    Plugin {
        /// Data source name.
        name: String,
        /// Failure reported by the data source.
        reason: anyhow::Error,
    },

    /// A PLUGIN mapping names a data source that was never registered.
    #[error("No data source registered under '{0}'")]
    UnknownPlugin(String),

    /// A CUSTOM mapping names a custom kind with no registered handler.
    #[error("No custom handler registered for '{0}'")]
    UnknownCustomType(String),

    /// A mapping strategy could not produce a value.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Logging(String),
}

impl TokamapError {
    /// Build a `Config` error for `path`.
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error originates from loading configuration documents.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::MissingField { .. }
                | Self::Manifest { .. }
                | Self::Settings(_)
        )
    }
}

impl From<figment::Error> for TokamapError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_file() {
        let err = TokamapError::config("/maps/mastu/globals.json", "expected value at line 1");
        let message = err.to_string();
        assert!(message.contains("/maps/mastu/globals.json"));
        assert!(message.contains("expected value"));
        assert!(err.is_configuration());
    }

    #[test]
    fn evaluation_errors_are_not_configuration_errors() {
        assert!(!TokamapError::Template("x".into()).is_configuration());
        assert!(!TokamapError::DuplicateCacheKey("k".into()).is_configuration());
    }
}
