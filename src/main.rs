//! CLI entry point for tokamap
//!
//! Resolves one request path against a mapping tree and prints the result.
//! Useful for checking mapping documents without a host program.
//!
//! # Usage
//!
//! ```bash
//! tokamap --mapping-dir /opt/mappings --device MASTU --shot 45272 \
//!     magnetics/ids_properties/homogeneous_time
//! ```
//!
//! Settings not given on the command line come from `--config` (TOML) and
//! `TOKAMAP_*` environment variables.
//!
//! `PLUGIN` and `CUSTOM` mappings need host-registered providers and fail
//! from the command line; `VALUE`, `DIMENSION` and `EXPR` mappings resolve.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokamap::logging::{self, LoggingConfig, OutputFormat};
use tokamap::{DataType, Engine, EngineConfig, Request};

#[derive(Parser)]
#[command(name = "tokamap")]
#[command(
    about = "Resolve data-dictionary paths through declarative JSON mappings",
    long_about = None
)]
struct Cli {
    /// Request path, e.g. magnetics/flux_loop[3]/flux/data
    path: String,

    /// Device name (case-insensitive)
    #[arg(long, short)]
    device: String,

    /// Shot number; omit for the shot-independent configuration
    #[arg(long, short)]
    shot: Option<i64>,

    /// Expected element type (int32, float64, string, ...)
    #[arg(long)]
    datatype: Option<DataType>,

    /// Expected rank
    #[arg(long, default_value_t = 0)]
    rank: usize,

    /// Extra request option passed to templates, as NAME=VALUE (repeatable)
    #[arg(long = "option", short = 'o', value_parser = parse_key_val)]
    options: Vec<(String, String)>,

    /// Root of the mapping tree (overrides the configuration)
    #[arg(long)]
    mapping_dir: Option<PathBuf>,

    /// TOML settings file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Data-dictionary version (overrides the configuration)
    #[arg(long)]
    dd_version: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,
}

fn parse_key_val(option: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = option
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{option}'"))?;
    Ok((name.trim().to_string(), value.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => EngineConfig::load()?,
    };
    if let Some(dir) = cli.mapping_dir {
        config.mapping_dir = dir;
    }
    if let Some(version) = cli.dd_version {
        config.dd_version = version;
    }

    logging::init(LoggingConfig::from_engine_config(&config)?.with_format(cli.log_format))?;

    let engine = Engine::new(config)?;

    let mut request = Request::new(&cli.device, &cli.path).with_rank(cli.rank);
    if let Some(shot) = cli.shot {
        request = request.with_shot(shot);
    }
    if let Some(data_type) = cli.datatype {
        request = request.with_data_type(data_type);
    }
    for (name, value) in cli.options {
        request = request.with_option(name, value);
    }

    match engine
        .resolve(&request)
        .with_context(|| format!("resolving {} for {}", cli.path, cli.device))?
    {
        Some(buffer) => println!("{buffer}"),
        None => {
            eprintln!("no mapping found for {} on {}", cli.path, cli.device);
            std::process::exit(1);
        }
    }
    Ok(())
}
