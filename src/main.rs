mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use auditscope_api::HttpTailerFactory;
use auditscope_logs::NoiseCatalog;
use auditscope_server::{SessionContext, WsServer};

use crate::config::Config;

/// Auditscope - live tail of identity platform logs for browser viewers
#[derive(Parser, Debug)]
#[command(name = "auditscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let catalog = match &config.noise_catalog {
        Some(path) => NoiseCatalog::load(path)
            .with_context(|| format!("Failed to load noise catalog {}", path.display()))?,
        None => NoiseCatalog::builtin().context("Built-in noise catalog is invalid")?,
    };
    tracing::info!(categories = catalog.len(), "noise catalog loaded");
    tracing::debug!(
        ids = ?catalog.categories().iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        "noise categories"
    );

    let context = SessionContext::new(
        Arc::new(catalog),
        Arc::new(HttpTailerFactory::new(config.client_options())),
        config.session_settings()?,
    );

    let cancel = CancellationToken::new();
    let server = WsServer::new(config.listen, context, cancel.clone())
        .with_max_connections(config.max_connections);
    let (listener, addr) = server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    tracing::info!(addr = %addr, "auditscope ready");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for interrupt"),
        }
    });

    server.serve(listener).await.context("WebSocket server failed")?;
    Ok(())
}
