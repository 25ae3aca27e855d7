//! Name-keyed registry of open clients.

use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::connection::{DatabaseClient, OpenResult};
use crate::error::{CloseFailure, ConnectFailure, PluginError, Result};

/// What callers see: the lone client, or every client by name
#[derive(Debug)]
pub enum Exposed<C> {
    Single(Arc<C>),
    Many(IndexMap<String, Arc<C>>),
}

impl<C: DatabaseClient> Exposed<C> {
    pub fn single(&self) -> Option<&Arc<C>> {
        match self {
            Self::Single(client) => Some(client),
            Self::Many(_) => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<C>> {
        match self {
            Self::Single(client) => (client.name() == name).then_some(client),
            Self::Many(clients) => clients.get(name),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(clients) => clients.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns every client handle for the lifetime of the host.
/// The map is fixed at construction; only `close_all` changes state afterwards.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    clients: IndexMap<String, Arc<C>>,
    exposed: Arc<Exposed<C>>,
    closed: AtomicBool,
    closing: Mutex<()>,
}

impl<C: DatabaseClient> ConnectionRegistry<C> {
    /// Build from a full batch of open results. Any failure fails the whole batch,
    /// after closing the clients that did open.
    pub async fn build(results: Vec<OpenResult<C>>) -> Result<Self> {
        let mut clients = IndexMap::with_capacity(results.len());
        let mut failures = Vec::new();
        let mut duplicates = Vec::new();

        for result in results {
            match result {
                OpenResult::Ok { name, client } => {
                    let client = Arc::new(client);
                    if clients.contains_key(&name) {
                        duplicates.push(client);
                    } else {
                        clients.insert(name, client);
                    }
                }
                OpenResult::Err { name, error } => failures.push(ConnectFailure { name, error }),
            }
        }

        let error = if !failures.is_empty() {
            Some(PluginError::Connect { failures })
        } else if let Some(client) = duplicates.first() {
            Some(PluginError::config(format!(
                "Duplicate connection name '{}'",
                client.name()
            )))
        } else if clients.is_empty() {
            Some(PluginError::config("No connections to register"))
        } else {
            None
        };

        if let Some(error) = error {
            let opened: Vec<_> = clients.into_values().chain(duplicates).collect();
            if !opened.is_empty() {
                tracing::warn!(
                    "Registration failed, closing {} connection(s) that did open",
                    opened.len()
                );
            }
            if let Err(close_error) = close_clients(&opened).await {
                tracing::warn!("{}", close_error);
            }
            return Err(error);
        }

        let exposed = match clients.first() {
            Some((_, client)) if clients.len() == 1 => Exposed::Single(Arc::clone(client)),
            _ => Exposed::Many(clients.clone()),
        };

        Ok(Self {
            clients,
            exposed: Arc::new(exposed),
            closed: AtomicBool::new(false),
            closing: Mutex::new(()),
        })
    }

    pub fn get(&self, name: &str) -> Result<&Arc<C>> {
        self.clients.get(name).ok_or_else(|| PluginError::NotFound {
            name: name.to_string(),
        })
    }

    /// The client registered from a single-connection configuration
    pub fn default_client(&self) -> Option<&Arc<C>> {
        self.exposed.single()
    }

    pub fn all(&self) -> &IndexMap<String, Arc<C>> {
        &self.clients
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The value published to the host. Every exposure point shares this `Arc`.
    pub fn exposed(&self) -> &Arc<Exposed<C>> {
        &self.exposed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every client, awaiting each. Close failures are collected, not short-circuited.
    /// Only the first call does any work; a concurrent call waits for it to finish.
    pub async fn close_all(&self) -> Result<()> {
        let _closing = self.closing.lock().await;
        if self.is_closed() {
            tracing::debug!("Connections already closed");
            return Ok(());
        }

        let clients: Vec<_> = self.clients.values().cloned().collect();
        let result = close_clients(&clients).await;
        // No retries: a failed close still counts as closed
        self.closed.store(true, Ordering::SeqCst);
        result?;
        tracing::info!("Closed {} MongoDB connection(s)", clients.len());
        Ok(())
    }
}

async fn close_clients<C: DatabaseClient>(clients: &[Arc<C>]) -> Result<()> {
    let outcomes = join_all(clients.iter().map(|client| async move {
        client.close().await.map_err(|error| CloseFailure {
            name: client.name().to_string(),
            error,
        })
    }))
    .await;

    let failures: Vec<_> = outcomes.into_iter().filter_map(|r| r.err()).collect();
    for failure in &failures {
        tracing::warn!(
            "Failed to close MongoDB connection '{}': {:#}",
            failure.name,
            failure.error
        );
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(PluginError::Close { failures })
    }
}
