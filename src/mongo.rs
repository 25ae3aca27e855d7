//! MongoDB driver connector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::DriverOptions;
use crate::connection::{Connector, DatabaseClient};
use crate::normalize::ConnectionSpec;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// An open MongoDB client, registered under `name`.
pub struct MongoClient {
    name: String,
    database: String,
    client: Client,
    closed: AtomicBool,
}

impl MongoClient {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The database named in the connection URI, or the connection name if the URI has none
    pub fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }
}

impl std::fmt::Debug for MongoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The driver client carries credentials in its options
        f.debug_struct("MongoClient")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl DatabaseClient for MongoClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing MongoDB connection '{}'", self.name);
        self.client.clone().shutdown().await;
        Ok(())
    }
}

/// Connects with the `mongodb` driver and pings the server before handing the client out.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Client = MongoClient;

    async fn open(&self, spec: &ConnectionSpec) -> Result<MongoClient> {
        let uri = uri_with_options(&spec.uri, &spec.options);

        let mut client_options = ClientOptions::parse(&uri)
            .await
            .context("Failed to parse MongoDB connection URL")?;

        // Set reasonable defaults
        if client_options.connect_timeout.is_none() {
            client_options.connect_timeout = Some(CONNECT_TIMEOUT);
        }
        if client_options.server_selection_timeout.is_none() {
            client_options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        }

        let database = client_options
            .default_database
            .clone()
            .unwrap_or_else(|| spec.name.clone());

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        // The driver connects lazily; force the handshake so failures surface now
        let ping = client.database("admin").run_command(doc! { "ping": 1 }).await;
        if let Err(e) = ping {
            client.shutdown().await;
            return Err(e).context("Failed to ping MongoDB server");
        }

        tracing::info!(
            "MongoDB connection '{}' established (database '{}')",
            spec.name,
            database
        );

        Ok(MongoClient {
            name: spec.name.clone(),
            database,
            client,
            closed: AtomicBool::new(false),
        })
    }
}

/// Append scalar driver options to the URI query string so the driver's URI parser
/// validates them. Options already present in the URI are left alone.
fn uri_with_options(uri: &str, options: &DriverOptions) -> String {
    let (base, query) = match uri.split_once('?') {
        Some((base, query)) => (base, query),
        None => (uri, ""),
    };

    let present: Vec<String> = query
        .split('&')
        .filter_map(|pair| pair.split('=').next())
        .filter(|key| !key.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    let mut params: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(str::to_string)
        .collect();

    for (key, value) in options {
        if present.contains(&key.to_ascii_lowercase()) {
            tracing::warn!("Driver option '{}' is already set in the URI, keeping the URI value", key);
            continue;
        }

        let value = match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                tracing::warn!("Skipping driver option '{}': only scalar values are supported", key);
                continue;
            }
        };

        params.push(format!(
            "{}={}",
            key,
            utf8_percent_encode(&value, NON_ALPHANUMERIC)
        ));
    }

    if params.is_empty() {
        return base.to_string();
    }

    // The option list must follow a path separator: mongodb://host/?opts
    let has_path = base
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    let separator = if has_path { "?" } else { "/?" };

    format!("{base}{separator}{}", params.join("&"))
}
