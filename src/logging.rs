//! Tracing initialisation.
//!
//! The library only emits `tracing` events and never installs a subscriber on
//! its own. Hosts that want one, the `tokamap` binary among them, call [`init`]:
//! `RUST_LOG` wins over the configured level, and events are rendered by a
//! single `fmt` layer in the chosen [`OutputFormat`].
//!
//! # Example
//! ```no_run
//! use tokamap::config::EngineConfig;
//! use tokamap::logging::{self, LoggingConfig, OutputFormat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load()?;
//! logging::init(LoggingConfig::from_engine_config(&config)?.with_format(OutputFormat::Compact))?;
//! tracing::info!("Mapping engine ready");
//! # Ok(())
//! # }
//! ```

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::EngineConfig;
use crate::error::{Result, TokamapError};

/// How `tokamap` renders log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Multi-line human-readable events, coloured when enabled.
    Pretty,
    /// One line per event, never coloured.
    Compact,
    /// Newline-delimited JSON events.
    Json,
}

/// Settings for the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter applied when `RUST_LOG` is not set.
    pub level: Level,
    /// Event rendering.
    pub format: OutputFormat,
    /// Log span creation and close.
    pub with_span_events: bool,
    /// Annotate events with their source location.
    pub with_file_and_line: bool,
    /// Colour `Pretty` output.
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Defaults with the fallback filter set to `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Settings whose level is the engine's `log_level`.
    pub fn from_engine_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(parse_log_level(&config.log_level)?))
    }

    /// Render events as `format`.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span lifecycle events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Toggle colour in `Pretty` output.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install `config` as the process-wide subscriber.
///
/// A process that already has a global subscriber keeps it, and the call
/// returns `Ok(())`.
pub fn init(config: LoggingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let filter = config.filter();
    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line);

    let layer = match config.format {
        OutputFormat::Pretty => base
            .pretty()
            .with_ansi(config.with_ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => base.json().with_filter(filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Lost a race with another thread installing its own subscriber.
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(TokamapError::Logging(e.to_string())),
    }
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(TokamapError::InvalidOption {
            name: "log_level".to_string(),
            value: level.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names_ignore_case() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn level_comes_from_engine_config() {
        let mut config = EngineConfig::new("/maps");
        config.log_level = "debug".into();
        let logging = LoggingConfig::from_engine_config(&config).unwrap();
        assert_eq!(logging.level, Level::DEBUG);
    }

    #[test]
    fn builder_sets_fields() {
        let config = LoggingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn init_keeps_an_installed_subscriber() {
        assert!(init(LoggingConfig::default()).is_ok());
        assert!(tracing::dispatcher::has_been_set());
        assert!(init(LoggingConfig::new(Level::TRACE).with_format(OutputFormat::Json)).is_ok());
    }
}
