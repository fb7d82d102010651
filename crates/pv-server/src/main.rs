//! pv-server - privoice bot process
//!
//! Connects to the Discord gateway, answers `meet` commands with private
//! voice rooms, sweeps expired rooms, and serves a liveness endpoint.

use anyhow::Context;
use clap::Parser;
use pv_core::VoiceRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod routes;
mod services;
mod state;

use cli::Cli;
use config::Config;
use services::BotService;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pv_server=info,pv_core=info,tower_http=info"));
    let subscriber = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    info!("pv-server v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load(&cli).context("Failed to load configuration")?);
    info!(
        port = config.port,
        sweep_interval_secs = config.sweep_interval_secs,
        channel_ttl_secs = config.channel_ttl_secs,
        "Config loaded"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let voices = Arc::new(VoiceRegistry::new());

    let mut bot = BotService::start(&config, voices.clone(), shutdown_rx.clone())?;

    let state = Arc::new(AppState::new(config.clone(), voices.clone(), bot.connected_flag()));
    let router = routes::create_router(state);

    let mut http_shutdown = shutdown_rx.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        result = bot.gateway_exit() => {
            if let Err(e) = &result {
                error!(error = %e, "Gateway exited");
            }
            result
        }
    };

    info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    bot.stop().await;

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }

    if !voices.is_empty() {
        warn!(rooms = voices.len(), "Exiting with live rooms; they will not be reclaimed");
    }
    outcome
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
