//! civ6-mcp - MCP stdio server for a running Civilization VI game
//!
//! Launched by an MCP client. Connects lazily to the game's tuner socket
//! (`CIV6_TUNER_HOST`/`CIV6_TUNER_PORT`, default 127.0.0.1:4318) and writes
//! journals under `CIV6_MCP_HOME` (default `~/.civ6-mcp`).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use civ6_core::config::{DEFAULT_HOST, DEFAULT_PORT};
use civ6_core::{default_home, ConnectionOptions, CoreConfig, GameSession};
use civ6_mcp::{GameToolHandler, McpServer};

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("CIV6_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn connection_from_env() -> Result<ConnectionOptions> {
    let host = std::env::var("CIV6_TUNER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = match std::env::var("CIV6_TUNER_PORT") {
        Ok(v) => v
            .parse()
            .with_context(|| format!("CIV6_TUNER_PORT is not a port number: {}", v))?,
        Err(_) => DEFAULT_PORT,
    };
    Ok(ConnectionOptions::with_addr(host, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let home = default_home();
    std::fs::create_dir_all(&home).ok();

    // stdout carries the protocol: log to stderr and a daily file only.
    let log_dir = home.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "civ6-mcp.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        eprintln!("PANIC at {}: {}", location, payload);
        tracing::error!(location = %location, "civ6-mcp panic: {}", payload);
    }));

    let config = CoreConfig {
        home,
        connection: connection_from_env()?,
    };
    info!(
        host = %config.connection.host,
        port = config.connection.port,
        home = %config.home.display(),
        "civ6-mcp starting"
    );

    let session = Arc::new(GameSession::new(config));
    let mut server = McpServer::new(GameToolHandler::new(session.clone()));
    let served = server.run().await;

    session.shutdown().await;
    info!("civ6-mcp stopped");
    served
}
