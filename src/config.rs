//! keystage configuration

use crate::error::{StageError, StageResult};
use crate::staging::DEFAULT_COLUMN;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured connection string.
pub const CONNECTION_ENV: &str = "KEYSTAGE_CONNECTION";

/// Main keystage configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeystageConfig {
    /// ADO.NET style SQL Server connection string
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Staging column name
    #[serde(default = "default_column")]
    pub column_name: String,

    /// Create a clustered primary key on the staging column
    #[serde(default = "default_true")]
    pub clustered: bool,
}

fn default_column() -> String {
    DEFAULT_COLUMN.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for KeystageConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            column_name: default_column(),
            clustered: true,
        }
    }
}

impl KeystageConfig {
    /// Create a new configuration builder
    pub fn builder() -> KeystageConfigBuilder {
        KeystageConfigBuilder::default()
    }

    /// `~/.config/keystage/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("keystage").join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> StageResult<Self> {
        toml::from_str(text).map_err(|e| StageError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> StageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path`, or from [`default_path`](Self::default_path) when it
    /// exists, then apply the environment override.
    pub fn load(path: Option<&Path>) -> StageResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(conn) = std::env::var(CONNECTION_ENV) {
            config.connection_string = Some(conn);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.column_name.is_empty() {
            return Err(StageError::Config("column_name must not be empty".to_string()));
        }
        if matches!(&self.connection_string, Some(conn) if conn.trim().is_empty()) {
            return Err(StageError::Config(
                "connection_string must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for KeystageConfig
#[derive(Debug, Default)]
pub struct KeystageConfigBuilder {
    config: KeystageConfig,
}

impl KeystageConfigBuilder {
    /// Set the connection string
    pub fn connection(mut self, conn: impl Into<String>) -> Self {
        self.config.connection_string = Some(conn.into());
        self
    }

    /// Set the staging column name
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.config.column_name = name.into();
        self
    }

    /// Set whether the primary key is clustered
    pub fn clustered(mut self, clustered: bool) -> Self {
        self.config.clustered = clustered;
        self
    }

    /// Build the configuration
    pub fn build(self) -> KeystageConfig {
        self.config
    }
}
