//! Turns plugin options into an ordered list of connection specs.

use std::collections::HashSet;

use crate::config::{ConnectionEntry, ConnectionInput, Decorate, DriverOptions, PluginConfig};
use crate::error::{PluginError, Result};

/// Key used for the plugin namespace and decorations when no `name` is given
pub const DEFAULT_NAME: &str = "mongo";

const SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    pub uri: String,
    pub options: DriverOptions,
    pub name: String,
}

/// Normalized plugin options, ready for opening and binding
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub specs: Vec<ConnectionSpec>,
    /// Key in the plugin namespace
    pub expose_as: String,
    /// Property set on the server and on every request, if decoration is enabled
    pub decorate_as: Option<String>,
}

pub fn normalize(config: &PluginConfig) -> Result<NormalizedConfig> {
    let top_name = match config.name.as_deref() {
        Some(name) if name.trim().is_empty() => {
            return Err(PluginError::config("'name' must not be empty"));
        }
        other => other,
    };

    let connection = config
        .connection
        .as_ref()
        .ok_or_else(|| PluginError::config("'connection' is required"))?;

    let specs = match connection {
        ConnectionInput::Uri(uri) => {
            vec![build_spec(uri, top_name, &config.options, &DriverOptions::new())?]
        }
        ConnectionInput::List(entries) => entries
            .iter()
            .map(|entry| match entry {
                ConnectionEntry::Uri(uri) => {
                    build_spec(uri, None, &config.options, &DriverOptions::new())
                }
                ConnectionEntry::Descriptor(d) => {
                    build_spec(&d.uri, d.name.as_deref(), &config.options, &d.options)
                }
            })
            .collect::<Result<Vec<_>>>()?,
    };

    if specs.is_empty() {
        return Err(PluginError::config("'connection' must not be an empty list"));
    }

    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(PluginError::config(format!(
                "Duplicate connection name '{}'",
                spec.name
            )));
        }
    }

    let expose_as = top_name.unwrap_or(DEFAULT_NAME).to_string();
    let decorate_as = match &config.decorate {
        Decorate::Enabled(false) => None,
        Decorate::Enabled(true) => Some(expose_as.clone()),
        Decorate::Property(property) if property.trim().is_empty() => {
            return Err(PluginError::config("'decorate' property must not be empty"));
        }
        Decorate::Property(property) => Some(property.clone()),
    };

    Ok(NormalizedConfig {
        specs,
        expose_as,
        decorate_as,
    })
}

fn build_spec(
    uri: &str,
    name: Option<&str>,
    defaults: &DriverOptions,
    options: &DriverOptions,
) -> Result<ConnectionSpec> {
    validate_uri(uri)?;

    let name = match name {
        Some(name) if name.trim().is_empty() => {
            return Err(PluginError::config(format!(
                "Empty connection name for '{uri}'"
            )));
        }
        Some(name) => name.to_string(),
        None => database_name(uri)
            .ok_or_else(|| {
                PluginError::config(format!(
                    "Cannot derive a connection name from '{uri}': add a database path or a name"
                ))
            })?
            .to_string(),
    };

    // Entry options win over the top-level defaults
    let mut merged = defaults.clone();
    merged.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(ConnectionSpec {
        uri: uri.to_string(),
        options: merged,
        name,
    })
}

fn strip_scheme(uri: &str) -> Option<&str> {
    SCHEMES.iter().find_map(|scheme| uri.strip_prefix(scheme))
}

/// Syntactic check only. The driver does the full parse when connecting.
pub fn validate_uri(uri: &str) -> Result<()> {
    let rest = strip_scheme(uri).ok_or_else(|| {
        PluginError::config(format!(
            "Invalid MongoDB URI '{uri}': must start with mongodb:// or mongodb+srv://"
        ))
    })?;

    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let hosts = match authority.rsplit_once('@') {
        Some((userinfo, hosts)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            if user.is_empty() {
                return Err(PluginError::config(format!(
                    "Invalid MongoDB URI '{uri}': credentials need a username"
                )));
            }
            hosts
        }
        None => authority,
    };

    if hosts.is_empty() {
        return Err(PluginError::config(format!(
            "Invalid MongoDB URI '{uri}': missing host"
        )));
    }

    Ok(())
}

/// Last path segment of the URI, without the query string.
pub fn database_name(uri: &str) -> Option<&str> {
    let rest = strip_scheme(uri)?;
    let rest = rest.split('?').next().unwrap_or_default();
    let (_, path) = rest.split_once('/')?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}
