//! # Datasource settings
//!
//! Per-instance configuration as stored by the dashboard host: a JSON
//! document with the public fields, plus a map of decrypted secrets.

use crate::client::{ConnectionParams, Credentials};
use crate::error::{DatasourceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key of the password inside the decrypted secrets map.
pub const PASSWORD_KEY: &str = "password";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Base URL of the ksqlDB server, e.g. `https://ksqldb:8088`.
    #[serde(rename = "ksqlserver", default)]
    pub ksql_server: String,
    /// Allow plaintext `http://` transport.
    #[serde(rename = "http", default)]
    pub allow_http: bool,
    #[serde(default)]
    pub username: String,
    #[serde(skip)]
    pub secrets: SecretSettings,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretSettings {
    pub password: String,
}

impl std::fmt::Debug for SecretSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSettings")
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

impl SecretSettings {
    pub fn from_decrypted(decrypted: &HashMap<String, String>) -> Self {
        Self {
            password: decrypted.get(PASSWORD_KEY).cloned().unwrap_or_default(),
        }
    }
}

impl PluginSettings {
    /// Decode the JSON settings document and attach the decrypted secrets.
    pub fn load(json_data: &[u8], decrypted: &HashMap<String, String>) -> Result<Self> {
        let mut settings: PluginSettings =
            serde_json::from_slice(json_data).map_err(DatasourceError::SettingsUnmarshal)?;
        settings.secrets = SecretSettings::from_decrypted(decrypted);
        Ok(settings)
    }

    pub fn has_server(&self) -> bool {
        !self.ksql_server.trim().is_empty()
    }

    /// Input for the transport client factory.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            url: self.ksql_server.trim().to_string(),
            allow_plaintext: self.allow_http,
            credentials: Credentials {
                username: self.username.clone(),
                password: self.secrets.password.clone(),
            },
        }
    }
}
