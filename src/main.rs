use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multi_mongo::{MongoConnector, PLUGIN_NAME, PluginConfig, Server, register};

/// Opens the configured `MongoDB` connections, keeps them registered on an
/// in-process server, and closes them all on Ctrl-C or SIGTERM.
#[derive(Parser)]
#[command(name = "multi-mongo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Named MongoDB connections with a managed lifecycle", long_about = None)]
struct Cli {
    /// Path to the YAML configuration (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multi_mongo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_file = PluginConfig::resolve_path(cli.config.as_deref())?;
    let config = PluginConfig::load(&config_file)?;
    tracing::info!("Configuration loaded from {:?}", config_file);

    let mut server = Server::new();
    let registry = register(&mut server, &config, &MongoConnector::new())
        .await
        .context("Failed to register MongoDB connections")?;

    tracing::info!(
        "{} exposes {:?} with connections: {}",
        PLUGIN_NAME,
        server.plugin_keys(PLUGIN_NAME),
        registry.names().join(", ")
    );

    shutdown_signal().await;

    server.stop().await?;
    tracing::info!("All MongoDB connections closed");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
