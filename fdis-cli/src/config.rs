//! Loading the pipeline configuration and applying command line overrides.

use std::path::{Path, PathBuf};

use fdis_pipeline::{ComponentSpec, PipelineConfig};
use fdis_stages::{FileReader, FileWriter};
use tracing::{debug, info};

use crate::cli::Args;
use crate::error::{AppError, Result};

pub const DEFAULT_CONFIG: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

fn parse(raw: &str, format: ConfigFormat) -> Result<PipelineConfig> {
    Ok(match format {
        ConfigFormat::Json => serde_json::from_str(raw)?,
        ConfigFormat::Toml => toml::from_str(raw)?,
    })
}

/// Read and parse a configuration file.
pub fn load(path: &Path) -> Result<PipelineConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&raw, ConfigFormat::of(path))?;
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// The configuration for this invocation.
///
/// An explicit `--config` must exist. Otherwise `config.json` in the working
/// directory is used when present, and an empty configuration when the
/// command line provides both a source and a destination.
pub fn resolve(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => load(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.is_file() {
                load(&default)?
            } else if !args.sources.is_empty() && !args.dests.is_empty() {
                info!("No {DEFAULT_CONFIG} found, using command line components only");
                PipelineConfig::default()
            } else {
                return Err(AppError::NoConfig);
            }
        }
    };
    apply_overrides(&mut config, args);
    Ok(config)
}

/// Command line values win over the file.
pub fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.sources.extend(args.sources.iter().map(|path| {
        ComponentSpec::new(FileReader::NAME).with_option("Source", path.to_string_lossy())
    }));
    config.sinks.extend(args.dests.iter().map(|path| {
        ComponentSpec::new(FileWriter::NAME).with_option("SaveFolder", path.to_string_lossy())
    }));
}
