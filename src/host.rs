//! Host server seam.
//!
//! The plugin never reaches into a server directly: it is handed a [`Host`] and uses it
//! to publish values and register shutdown work. [`Server`] is a small in-process host
//! for the binary and for tests.

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A value published to the host. Readers downcast it back to its concrete type.
pub type Shared = Arc<dyn Any + Send + Sync>;

/// Work the host awaits while stopping
pub type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

pub trait Host {
    /// Publish `value` in the namespace of `plugin` under `key`
    fn expose(&mut self, plugin: &str, key: &str, value: Shared);

    /// Whether `property` is already taken on the server or on requests
    fn is_decorated(&self, property: &str) -> bool;

    fn decorate_server(&mut self, property: &str, value: Shared);

    /// Attach `value` to every request context created from now on
    fn decorate_request(&mut self, property: &str, value: Shared);

    fn on_shutdown(&mut self, hook: ShutdownHook);
}

fn downcast<T: Any + Send + Sync>(value: &Shared) -> Option<Arc<T>> {
    Arc::clone(value).downcast::<T>().ok()
}

/// Per-request view of the server decorations
#[derive(Clone, Default)]
pub struct RequestContext {
    decorations: HashMap<String, Shared>,
}

impl RequestContext {
    pub fn get<T: Any + Send + Sync>(&self, property: &str) -> Option<Arc<T>> {
        self.decorations.get(property).and_then(downcast::<T>)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.decorations.contains_key(property)
    }
}

#[derive(Default)]
pub struct Server {
    plugins: HashMap<String, HashMap<String, Shared>>,
    decorations: HashMap<String, Shared>,
    request_decorations: HashMap<String, Shared>,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plugin<T: Any + Send + Sync>(&self, plugin: &str, key: &str) -> Option<Arc<T>> {
        self.plugins.get(plugin)?.get(key).and_then(downcast::<T>)
    }

    /// Keys published by `plugin`, sorted
    pub fn plugin_keys(&self, plugin: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .plugins
            .get(plugin)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn decoration<T: Any + Send + Sync>(&self, property: &str) -> Option<Arc<T>> {
        self.decorations.get(property).and_then(downcast::<T>)
    }

    pub fn request(&self) -> RequestContext {
        RequestContext {
            decorations: self.request_decorations.clone(),
        }
    }

    /// Run every shutdown hook in registration order, awaiting each one.
    /// Hook failures are collected and reported once all hooks have run.
    pub async fn stop(&mut self) -> Result<()> {
        let hooks = std::mem::take(&mut self.shutdown_hooks);
        tracing::info!("Stopping server ({} shutdown hook(s))", hooks.len());

        let mut errors = Vec::new();
        for hook in hooks {
            if let Err(e) = hook().await {
                tracing::error!("Shutdown hook failed: {:#}", e);
                errors.push(format!("{e:#}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Server stopped with errors: {}", errors.join("; ")))
        }
    }
}

impl Host for Server {
    fn expose(&mut self, plugin: &str, key: &str, value: Shared) {
        self.plugins
            .entry(plugin.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn is_decorated(&self, property: &str) -> bool {
        self.decorations.contains_key(property) || self.request_decorations.contains_key(property)
    }

    fn decorate_server(&mut self, property: &str, value: Shared) {
        self.decorations.insert(property.to_string(), value);
    }

    fn decorate_request(&mut self, property: &str, value: Shared) {
        self.request_decorations.insert(property.to_string(), value);
    }

    fn on_shutdown(&mut self, hook: ShutdownHook) {
        self.shutdown_hooks.push(hook);
    }
}
