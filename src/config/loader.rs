//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{GatewayConfig, InstanceConfig};
use crate::config::validation::{validate_config, validate_instance, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate the gateway configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = read(path)?;
    let config: GatewayConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate a single instance document.
pub fn load_instance_file(path: &Path) -> Result<InstanceConfig, ConfigError> {
    let content = read(path)?;
    let config: InstanceConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_instance(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// True when `path` looks like an instance document.
pub fn is_instance_file(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

/// Load every instance document found in `dir`.
///
/// Broken files are logged and skipped so that one bad region does not keep
/// the others from being served. Results are sorted by path.
pub fn load_instances_dir(
    dir: &Path,
    extension: &str,
) -> Result<Vec<(PathBuf, InstanceConfig)>, ConfigError> {
    let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_instance_file(path, extension))
        .collect();
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::info!(path = %path.display(), "Reading instance file");
        match load_instance_file(&path) {
            Ok(config) => loaded.push((path, config)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Skipping invalid instance file");
            }
        }
    }

    Ok(loaded)
}
