//! Database client abstraction and concurrent opening.
//! The registry only talks to clients through these traits, so tests can swap the driver out.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;

use crate::normalize::ConnectionSpec;

/// An open client handle owned by the registry.
#[async_trait]
pub trait DatabaseClient: Send + Sync + 'static {
    /// Name the client is registered under
    fn name(&self) -> &str;

    fn is_closed(&self) -> bool;

    /// Close the underlying connection. Calling it on a closed client is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Opens one connection spec. Implementations must not retry.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: DatabaseClient;

    async fn open(&self, spec: &ConnectionSpec) -> Result<Self::Client>;
}

/// Outcome of opening one connection
#[derive(Debug)]
pub enum OpenResult<C> {
    Ok { name: String, client: C },
    Err { name: String, error: anyhow::Error },
}

impl<C> OpenResult<C> {
    pub fn name(&self) -> &str {
        match self {
            Self::Ok { name, .. } | Self::Err { name, .. } => name,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Open every connection concurrently. Results keep the input order, whatever the completion order.
pub async fn open_all<K: Connector>(
    connector: &K,
    specs: &[ConnectionSpec],
) -> Vec<OpenResult<K::Client>> {
    let attempts = specs.iter().map(|spec| async move {
        tracing::info!("Opening MongoDB connection '{}'", spec.name);
        match connector.open(spec).await {
            Ok(client) => OpenResult::Ok {
                name: spec.name.clone(),
                client,
            },
            Err(error) => {
                tracing::error!("Failed to open MongoDB connection '{}': {:#}", spec.name, error);
                OpenResult::Err {
                    name: spec.name.clone(),
                    error,
                }
            }
        }
    });

    join_all(attempts).await
}
