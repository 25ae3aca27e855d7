//! Attach named MongoDB connections to a host server and close them when it stops.
//!
//! ```rust,no_run
//! use multi_mongo::{MongoClient, MongoConnector, PLUGIN_NAME, PluginConfig, Server, register};
//! use multi_mongo::registry::Exposed;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut server = Server::new();
//! let config = PluginConfig::from_value(serde_json::json!({
//!     "connection": "mongodb://localhost:27017/test",
//!     "decorate": true
//! }))?;
//!
//! register(&mut server, &config, &MongoConnector::new()).await?;
//!
//! let mongo = server.plugin::<Exposed<MongoClient>>(PLUGIN_NAME, "mongo");
//! assert!(mongo.is_some());
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod mongo;
pub mod normalize;
pub mod plugin;
pub mod registry;

#[cfg(test)]
mod probe;

pub use config::PluginConfig;
pub use connection::{Connector, DatabaseClient};
pub use error::{PluginError, Result};
pub use host::{Host, RequestContext, Server};
pub use mongo::{MongoClient, MongoConnector};
pub use plugin::{PLUGIN_NAME, register};
pub use registry::ConnectionRegistry;
