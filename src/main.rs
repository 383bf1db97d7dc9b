//! Switchyard HTTP server
//!
//! Serves routing decisions and the switch, rule and provider health APIs.

use clap::Parser;
use switchyard::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    gateway::Gateway,
    handlers::{self, AppState},
    store::{DurableStore, FileStore, MemoryStore},
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(config_path)?;
    telemetry::init(
        &config.observability.log_level,
        config.observability.log_format,
    );

    tracing::info!(
        config = %config_path,
        host = %config.server.host,
        port = config.server.port,
        "Starting Switchyard"
    );

    let store: Arc<dyn DurableStore> = match &config.storage.path {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "Using file-backed store");
            Arc::new(FileStore::open(dir).await?)
        }
        None => {
            tracing::warn!("No storage path configured, switch state will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let gateway = Gateway::builder(config).store(store).build().await?;
    let shutdown = CancellationToken::new();
    gateway.start(shutdown.clone());

    let app = handlers::router(AppState::new(gateway.clone()));

    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    gateway.stop().await;
    Ok(())
}
