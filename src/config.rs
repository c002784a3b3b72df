//! Configuration for Docket
//!
//! Loaded from `docket.yaml`:
//!
//! ```yaml
//! database:
//!   connectionString: file:///var/lib/docket
//!   databaseName: cams
//! logLevel: info
//! ```
//!
//! `DATABASE_CONNECTION_STRING` and `DATABASE_NAME` override the file.

use crate::error::{Error, Result};
use crate::validation::validate_database_name;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "docket.yaml";

pub const CONNECTION_STRING_VAR: &str = "DATABASE_CONNECTION_STRING";
pub const DATABASE_NAME_VAR: &str = "DATABASE_NAME";

/// Where a repository's connection goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub connection_string: String,
    pub database_name: String,
}

impl ConnectionConfig {
    pub fn new(connection_string: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database_name: database_name.into(),
        }
    }

    /// In-memory database, handy for tests and dry runs
    pub fn in_memory(name: &str) -> Self {
        Self::new(format!("memory://{}", name), name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub database: ConnectionConfig,
    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn new(database: ConnectionConfig) -> Self {
        Self {
            database,
            log_level: default_log_level(),
        }
    }

    /// Load a YAML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Build from the environment alone
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let missing = |var: &str| Error::Config {
            message: format!("{} is not set", var),
        };
        let connection_string = lookup(CONNECTION_STRING_VAR).ok_or_else(|| missing(CONNECTION_STRING_VAR))?;
        let database_name = lookup(DATABASE_NAME_VAR).ok_or_else(|| missing(DATABASE_NAME_VAR))?;

        let config = Self::new(ConnectionConfig::new(connection_string, database_name));
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(CONNECTION_STRING_VAR) {
            self.database.connection_string = value;
        }
        if let Some(value) = lookup(DATABASE_NAME_VAR) {
            self.database.database_name = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.database.scheme().map_err(|err| Error::Config {
            message: err.to_string(),
        })?;
        validate_database_name(&self.database.database_name).map_err(|err| Error::Config {
            message: err.to_string(),
        })?;
        Ok(())
    }
}
