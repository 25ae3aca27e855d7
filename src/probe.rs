//! Test connector that counts opens and closes without touching the network.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::connection::{Connector, DatabaseClient};
use crate::normalize::ConnectionSpec;

#[derive(Debug)]
pub struct ProbeClient {
    name: String,
    uri: String,
    closed: AtomicBool,
    fail_close: bool,
    close_delay: Option<Duration>,
    closes: Arc<AtomicUsize>,
}

impl ProbeClient {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl DatabaseClient for ProbeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("socket already reset");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ProbeConnector {
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    failing: HashSet<String>,
    failing_close: HashSet<String>,
    delays: HashMap<String, Duration>,
    close_delays: HashMap<String, Duration>,
}

impl ProbeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every open of this URI
    pub fn failing(mut self, uri: &str) -> Self {
        self.failing.insert(uri.to_string());
        self
    }

    /// Clients opened from this URI fail when closed
    pub fn failing_close(mut self, uri: &str) -> Self {
        self.failing_close.insert(uri.to_string());
        self
    }

    pub fn with_delay(mut self, uri: &str, delay: Duration) -> Self {
        self.delays.insert(uri.to_string(), delay);
        self
    }

    /// Clients opened from this URI take `delay` to close
    pub fn with_close_delay(mut self, uri: &str, delay: Duration) -> Self {
        self.close_delays.insert(uri.to_string(), delay);
        self
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Clients opened and not closed yet
    pub fn live(&self) -> usize {
        self.opens() - self.closes()
    }
}

#[async_trait]
impl Connector for ProbeConnector {
    type Client = ProbeClient;

    async fn open(&self, spec: &ConnectionSpec) -> Result<ProbeClient> {
        if let Some(delay) = self.delays.get(&spec.uri) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&spec.uri) {
            bail!("connect ECONNREFUSED for {}", spec.uri);
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeClient {
            name: spec.name.clone(),
            uri: spec.uri.clone(),
            closed: AtomicBool::new(false),
            fail_close: self.failing_close.contains(&spec.uri),
            close_delay: self.close_delays.get(&spec.uri).copied(),
            closes: Arc::clone(&self.closes),
        })
    }
}
