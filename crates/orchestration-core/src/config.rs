use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::OrchestratorError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "NETUNICORN_CONFIG";

/// Top-level configuration shared by the control plane and gateway services.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub log: LoggingConfig,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        5
    }
}

/// Per-connector free-form configuration; connectors parse their own
/// `kind`-specific fields out of `properties`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Helper to load configuration with guard rails, mirroring the resolution
/// order used across the netunicorn services.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `NETUNICORN_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, OrchestratorError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| OrchestratorError::config_io(candidate.clone(), err))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| OrchestratorError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), OrchestratorError> {
        if config.gateway.endpoint.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfiguration(
                "gateway.endpoint must not be empty".into(),
            ));
        }
        if config.database.url.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfiguration(
                "database.url must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_gateway_endpoint() {
        let config = Config {
            host: "0.0.0.0".into(),
            port: 8000,
            log: LoggingConfig { level: "info".into() },
            gateway: GatewayConfig { endpoint: "".into() },
            database: DatabaseConfig { url: "postgres://x".into(), max_connections: 5 },
            connectors: HashMap::new(),
        };
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
