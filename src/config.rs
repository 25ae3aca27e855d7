use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PluginError;

/// Driver options, keyed by MongoDB URI option name (`appName`, `maxPoolSize`, ...)
pub type DriverOptions = serde_json::Map<String, serde_json::Value>;

/// Expand environment variables and tilde in a path string.
/// Supports: $HOME, ${VAR}, ~/path
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// A single connection entry with its own options and optional name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
    pub uri: String,
    #[serde(default)]
    pub options: DriverOptions,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConnectionEntry {
    Uri(String),
    Descriptor(Descriptor),
}

/// Accepted shapes for the `connection` option
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConnectionInput {
    Uri(String),
    List(Vec<ConnectionEntry>),
}

/// `decorate: true` or `decorate: "propertyName"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Decorate {
    Enabled(bool),
    Property(String),
}

impl Default for Decorate {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

/// Raw plugin options as handed over by the host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[serde(default)]
    pub connection: Option<ConnectionInput>,

    #[serde(default)]
    pub options: DriverOptions,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub decorate: Decorate,
}

impl PluginConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, PluginError> {
        serde_json::from_value(value).map_err(|e| PluginError::config(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, PluginError> {
        serde_yaml::from_str(content).map_err(|e| PluginError::config(e.to_string()))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(env!("CARGO_PKG_NAME"));

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Resolve the config file path, falling back to the default location
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(PathBuf::from(expand_path(path))),
            None => Self::config_file(),
        }
    }

    pub fn load(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            Self::create_example_config(config_file)?;
            anyhow::bail!(
                "Configuration file not found. An example configuration has been created at:\n\
                {}\n\n\
                Please edit this file to configure your MongoDB connections.",
                config_file.display()
            );
        }

        let content = fs::read_to_string(config_file).context("Failed to read config file")?;

        Self::from_yaml(&content).context("Failed to parse config file")
    }

    fn create_example_config(config_file: &Path) -> Result<()> {
        let example_content = r"# multi-mongo configuration

# A single connection, exposed under `name` (default: mongo)
connection: mongodb://localhost:27017/test

# Or several connections, each named after its database unless a name is given
# connection:
#   - mongodb://localhost:27017/test
#   - uri: mongodb://localhost:27017/local
#     name: localDb
#     options:
#       appName: multi-mongo

# Default driver options merged into every connection (entry options win)
# options:
#   maxPoolSize: 10

# Key under which connections are exposed in the plugin namespace
# name: mongo

# Also attach connections to the server and to every request context.
# true uses `name`, a string sets the property name.
# decorate: false
";

        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        fs::write(config_file, example_content).context("Failed to write example config file")?;

        Ok(())
    }
}
