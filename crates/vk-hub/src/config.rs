//! # Hub configuration
//!
//! Loaded from a TOML file; every field has a default so a missing or
//! partial file still yields a usable config. A file that exists but cannot
//! be read or parsed is an error.
//!
//! The `[datasource]` table can instead come from a JSON document in the
//! form the dashboard host stores per instance (`--settings`).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vk_core::assembler::TypePolicy;
use vk_core::datasource::DatasourceOptions;
use vk_core::driver::DriverOptions;
use vk_core::settings::{PluginSettings, SecretSettings, PASSWORD_KEY};
use vk_core::DatasourceError;

/// Environment variable holding the ksqlDB password.
pub const PASSWORD_ENV: &str = "VK_KSQL_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Unable to load settings: {0}")]
    Settings(#[from] DatasourceError),
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    /// Same field names as the datasource JSON settings.
    #[serde(default)]
    pub datasource: PluginSettings,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StreamConfig {
    #[serde(default)]
    pub type_policy: TypePolicy,
    #[serde(default = "default_offset_reset")]
    pub offset_reset: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            type_policy: TypePolicy::Strict,
            offset_reset: default_offset_reset(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct HealthConfig {
    /// Contact the server during health checks.
    #[serde(default)]
    pub probe: bool,
}

fn default_offset_reset() -> String {
    "latest".into()
}
fn default_channel_capacity() -> usize {
    64
}

impl Config {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Datasource settings with the secret taken from `secrets`.
    pub fn plugin_settings(&self, secrets: &HashMap<String, String>) -> PluginSettings {
        PluginSettings {
            secrets: SecretSettings::from_decrypted(secrets),
            ..self.datasource.clone()
        }
    }

    /// Replace `[datasource]` with the JSON settings document at `path`.
    pub fn load_settings_json(&mut self, path: &Path) -> Result<(), ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.datasource = PluginSettings::load(&data, &HashMap::new())?;
        Ok(())
    }

    pub fn datasource_options(&self) -> DatasourceOptions {
        let offset_reset = match self.stream.offset_reset.trim() {
            "" => None,
            reset => Some(reset.to_string()),
        };
        DatasourceOptions {
            driver: DriverOptions {
                type_policy: self.stream.type_policy,
                channel_capacity: self.stream.channel_capacity,
                offset_reset,
            },
            health_probe: self.health.probe,
        }
    }
}

/// Decrypted secrets as provided by the process environment.
pub fn secrets_from_env() -> HashMap<String, String> {
    let mut secrets = HashMap::new();
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        secrets.insert(PASSWORD_KEY.to_string(), password);
    }
    secrets
}
