//! The control plane reuses `orchestration_core`'s `Config`/`ConfigLoader`
//! rather than defining its own: both this service and the gateway read
//! the same TOML file, so there is exactly one place that parses and
//! validates it.

use std::path::PathBuf;

use anyhow::Result;
pub use orchestration_core::{Config as AppConfig, ConfigLoader};

/// Resolution order is `ConfigLoader`'s: explicit path -> `NETUNICORN_CONFIG`
/// env var -> `config.toml` in the working directory.
pub fn load(path: Option<PathBuf>) -> Result<AppConfig> {
    Ok(ConfigLoader::load(path)?)
}
