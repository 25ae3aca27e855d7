//! Error taxonomy for plugin registration, lookup and shutdown.

use std::fmt;
use thiserror::Error;

/// A single connection that could not be opened.
#[derive(Debug)]
pub struct ConnectFailure {
    pub name: String,
    pub error: anyhow::Error,
}

/// A single connection that failed to close during shutdown.
#[derive(Debug)]
pub struct CloseFailure {
    pub name: String,
    pub error: anyhow::Error,
}

#[derive(Error, Debug)]
pub enum PluginError {
    /// Missing or malformed plugin options. Raised before any network activity.
    #[error("Invalid plugin configuration: {reason}")]
    Config { reason: String },

    /// One or more connections could not be established
    #[error("Failed to open {} MongoDB connection(s): {}", .failures.len(), Failures(.failures))]
    Connect { failures: Vec<ConnectFailure> },

    #[error("No MongoDB connection registered under '{name}'")]
    NotFound { name: String },

    /// Collected close failures, reported once every connection has been attempted
    #[error("Failed to close {} MongoDB connection(s): {}", .failures.len(), Failures(.failures))]
    Close { failures: Vec<CloseFailure> },
}

impl PluginError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PluginError> = std::result::Result<T, E>;

trait NamedFailure {
    fn name(&self) -> &str;
    fn error(&self) -> &anyhow::Error;
}

impl NamedFailure for ConnectFailure {
    fn name(&self) -> &str {
        &self.name
    }

    fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl NamedFailure for CloseFailure {
    fn name(&self) -> &str {
        &self.name
    }

    fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

struct Failures<'a, F>(&'a Vec<F>);

impl<F: NamedFailure> fmt::Display for Failures<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "'{}': {:#}", failure.name(), failure.error())?;
        }
        Ok(())
    }
}
