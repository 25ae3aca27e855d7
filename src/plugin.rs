//! Plugin registration: normalize, open, publish, and hook shutdown.

use futures::FutureExt;
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::connection::{Connector, DatabaseClient, open_all};
use crate::error::{PluginError, Result};
use crate::host::{Host, Shared};
use crate::normalize::{NormalizedConfig, normalize};
use crate::registry::ConnectionRegistry;

/// Namespace the plugin publishes into
pub const PLUGIN_NAME: &str = "hapi-multi-mongo";

/// Register the plugin on `host`.
///
/// Every connection is open before this returns. On any configuration or connection
/// error nothing is published and no connection is left open.
pub async fn register<H, K>(
    host: &mut H,
    config: &PluginConfig,
    connector: &K,
) -> Result<Arc<ConnectionRegistry<K::Client>>>
where
    H: Host,
    K: Connector,
{
    let normalized = normalize(config)?;

    // Checked before connecting so a taken property never costs a connection
    if let Some(property) = normalized
        .decorate_as
        .as_deref()
        .filter(|property| host.is_decorated(property))
    {
        return Err(PluginError::config(format!(
            "Property '{property}' is already decorated on the server"
        )));
    }

    tracing::info!(
        "Registering {} MongoDB connection(s): {}",
        normalized.specs.len(),
        normalized
            .specs
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let results = open_all(connector, &normalized.specs).await;
    let registry = Arc::new(ConnectionRegistry::build(results).await?);

    bind(host, &registry, &normalized);

    Ok(registry)
}

/// Publish the registry on the host and register its shutdown hook.
pub fn bind<H, C>(host: &mut H, registry: &Arc<ConnectionRegistry<C>>, config: &NormalizedConfig)
where
    H: Host,
    C: DatabaseClient,
{
    let value: Shared = registry.exposed().clone();

    host.expose(PLUGIN_NAME, &config.expose_as, Arc::clone(&value));

    if let Some(property) = &config.decorate_as {
        host.decorate_server(property, Arc::clone(&value));
        host.decorate_request(property, value);
        tracing::info!("Decorated server and requests with '{}'", property);
    }

    let registry = Arc::clone(registry);
    host.on_shutdown(Box::new(move || {
        async move { registry.close_all().await.map_err(anyhow::Error::from) }.boxed()
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Server;
    use crate::probe::{ProbeClient, ProbeConnector};
    use crate::registry::Exposed;
    use serde_json::json;

    type Clients = Exposed<ProbeClient>;

    async fn register_json(
        server: &mut Server,
        connector: &ProbeConnector,
        value: serde_json::Value,
    ) -> Result<Arc<ConnectionRegistry<ProbeClient>>> {
        register(server, &PluginConfig::from_value(value)?, connector).await
    }

    #[tokio::test]
    async fn test_register_with_just_url() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        let registry = register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test" }),
        )
        .await
        .unwrap();

        let mongo = server.plugin::<Clients>(PLUGIN_NAME, "mongo").unwrap();
        assert_eq!(mongo.single().unwrap().name(), "test");
        assert_eq!(server.plugin_keys(PLUGIN_NAME), vec!["mongo".to_string()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test]
    async fn test_publishes_under_plugin_id() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test" }),
        )
        .await
        .unwrap();

        assert_eq!(PLUGIN_NAME, "hapi-multi-mongo");
        assert!(server.plugin::<Clients>("hapi-multi-mongo", "mongo").is_some());
        assert!(server.plugin_keys("multi-mongo").is_empty());
    }

    #[tokio::test]
    async fn test_register_with_url_and_options() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        let registry = register_json(
            &mut server,
            &connector,
            json!({
                "connection": "mongodb://localhost:27017/test",
                "options": { "appName": "api" }
            }),
        )
        .await
        .unwrap();

        assert_eq!(registry.get("test").unwrap().uri(), "mongodb://localhost:27017/test");
    }

    #[tokio::test]
    async fn test_custom_name_replaces_default_key() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test", "name": "myMongo" }),
        )
        .await
        .unwrap();

        assert!(server.plugin::<Clients>(PLUGIN_NAME, "myMongo").is_some());
        assert!(server.plugin::<Clients>(PLUGIN_NAME, "mongo").is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_options_before_connecting() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        for value in [
            json!({ "conn": "mongodb://localhost:27017/test" }),
            json!({ "url": "mongodb://localhost:27018/test" }),
            json!({}),
            json!({ "connection": 42 }),
            json!({ "connection": [] }),
            json!({ "connection": "mongodb://:pass@localhost:27017/test" }),
            json!({ "connection": "http://localhost:27017/test" }),
        ] {
            let err = register_json(&mut server, &connector, value).await.unwrap_err();
            assert!(matches!(err, PluginError::Config { .. }), "{err}");
        }

        assert_eq!(connector.opens(), 0);
        assert!(server.plugin_keys(PLUGIN_NAME).is_empty());
    }

    #[tokio::test]
    async fn test_fails_when_server_unreachable() {
        let mut server = Server::new();
        let connector = ProbeConnector::new().failing("mongodb://localhost:27018/test");

        let err = register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27018/test" }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PluginError::Connect { .. }));
        assert!(server.plugin_keys(PLUGIN_NAME).is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_exposes_nothing_and_leaks_nothing() {
        let mut server = Server::new();
        let connector = ProbeConnector::new().failing("mongodb://localhost:27018/local");

        let err = register_json(
            &mut server,
            &connector,
            json!({
                "connection": [
                    "mongodb://localhost:27017/test",
                    "mongodb://localhost:27018/local",
                    "mongodb://localhost:27017/admin"
                ],
                "decorate": true
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PluginError::Connect { ref failures } if failures.len() == 1));
        assert!(server.plugin_keys(PLUGIN_NAME).is_empty());
        assert!(server.decoration::<Clients>("mongo").is_none());
        assert!(!server.request().contains("mongo"));
        assert_eq!(connector.opens(), 2);
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test]
    async fn test_multiple_connections() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({
                "connection": [
                    "mongodb://localhost:27017/test",
                    "mongodb://localhost:27017/local"
                ]
            }),
        )
        .await
        .unwrap();

        let mongo = server.plugin::<Clients>(PLUGIN_NAME, "mongo").unwrap();
        let Exposed::Many(clients) = mongo.as_ref() else {
            panic!("expected a name-keyed mapping");
        };
        let names: Vec<_> = clients.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["test", "local"]);
    }

    #[tokio::test]
    async fn test_descriptor_names() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        let registry = register_json(
            &mut server,
            &connector,
            json!({
                "connection": [{ "uri": "mongodb://localhost:27017/test" }, { "uri": "mongodb://localhost:27017/local" }]
            }),
        )
        .await
        .unwrap();
        assert_eq!(registry.names(), vec!["test", "local"]);

        let mut server = Server::new();
        let registry = register_json(
            &mut server,
            &connector,
            json!({
                "connection": [
                    { "uri": "mongodb://localhost:27017/test", "options": {}, "name": "myMongoConn1" },
                    "mongodb://localhost:27017/local"
                ]
            }),
        )
        .await
        .unwrap();

        let mongo = server.plugin::<Clients>(PLUGIN_NAME, "mongo").unwrap();
        assert_eq!(mongo.len(), 2);
        assert!(mongo.get("myMongoConn1").is_some());
        assert!(mongo.get("local").is_some());
        assert!(registry.get("test").is_err());
    }

    #[tokio::test]
    async fn test_decorate_shares_namespace_value() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test", "decorate": true }),
        )
        .await
        .unwrap();

        let namespaced = server.plugin::<Clients>(PLUGIN_NAME, "mongo").unwrap();
        let decorated = server.decoration::<Clients>("mongo").unwrap();
        let request = server.request().get::<Clients>("mongo").unwrap();

        assert!(Arc::ptr_eq(&namespaced, &decorated));
        assert!(Arc::ptr_eq(&namespaced, &request));
    }

    #[tokio::test]
    async fn test_decorate_with_custom_name() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({
                "connection": "mongodb://localhost:27017/test",
                "decorate": true,
                "name": "myMongo"
            }),
        )
        .await
        .unwrap();

        assert!(server.decoration::<Clients>("myMongo").is_some());
        assert!(server.request().get::<Clients>("myMongo").is_some());
        assert!(server.decoration::<Clients>("mongo").is_none());
    }

    #[tokio::test]
    async fn test_decorate_with_property_name() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test", "decorate": "db" }),
        )
        .await
        .unwrap();

        assert!(server.decoration::<Clients>("db").is_some());
        assert!(server.plugin::<Clients>(PLUGIN_NAME, "mongo").is_some());
    }

    #[tokio::test]
    async fn test_taken_decoration_rejected_before_connecting() {
        let mut server = Server::new();
        server.decorate_server("mongo", Arc::new(()));
        let connector = ProbeConnector::new();

        let err = register_json(
            &mut server,
            &connector,
            json!({ "connection": "mongodb://localhost:27017/test", "decorate": true }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PluginError::Config { .. }));
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test]
    async fn test_disconnects_when_server_stops() {
        let mut server = Server::new();
        let connector = ProbeConnector::new();

        let registry = register_json(
            &mut server,
            &connector,
            json!({
                "connection": [
                    "mongodb://localhost:27017/test",
                    "mongodb://localhost:27017/local"
                ]
            }),
        )
        .await
        .unwrap();
        assert!(registry.all().values().all(|c| !c.is_closed()));

        server.stop().await.unwrap();

        assert!(registry.is_closed());
        assert!(registry.all().values().all(|c| c.is_closed()));
        assert_eq!(connector.live(), 0);

        // A second close does not fail or close anything again
        registry.close_all().await.unwrap();
        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test]
    async fn test_stop_reports_close_failures() {
        let mut server = Server::new();
        let connector = ProbeConnector::new().failing_close("mongodb://localhost:27017/test");

        let registry = register_json(
            &mut server,
            &connector,
            json!({
                "connection": [
                    "mongodb://localhost:27017/test",
                    "mongodb://localhost:27017/local"
                ]
            }),
        )
        .await
        .unwrap();

        let err = server.stop().await.unwrap_err();
        assert!(err.to_string().contains("'test'"));
        assert!(registry.get("local").unwrap().is_closed());
    }
}
