//! Tic-Tac-Toe Match Server - authoritative turn-based match server
//!
//! This is the main entry point. It handles:
//! - WebSocket connections for matchmaking and live matches
//! - HTTP endpoints for health, matchmaking and the leaderboard
//! - The ranking writer that persists match winners

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::reporter::spawn_ranking_writer;
use crate::game::MatchRegistry;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Tic-Tac-Toe Match Server");
    info!(
        addr = %config.server_addr,
        tick_rate = config.tick_rate,
        turn_time_limit_secs = config.turn_time_limit_secs,
        leaderboard = %config.leaderboard_id,
        "Configuration loaded"
    );

    // Create application state
    let (state, records_rx) = AppState::new(config.clone());
    info!(match_types = ?state.match_types.names(), "Match types registered");

    // Persist match winners off the tick path
    spawn_ranking_writer(state.rankings.clone(), records_rx);

    // Spawn matchmaking service
    let matchmaking = state.matchmaking.clone();
    tokio::spawn(async move {
        matchmaking.run().await;
    });

    // Kept for teardown once the server stops accepting connections
    let match_registry = state.match_registry.clone();

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_matches(&match_registry).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// How long live matches get to wind down on shutdown
const MATCH_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminate every live match and wait for the runners to unregister
async fn shutdown_matches(registry: &MatchRegistry) {
    let grace_secs = MATCH_SHUTDOWN_TIMEOUT.as_secs();
    let terminated = registry.terminate_all(grace_secs).await;
    info!(matches = terminated, "Terminating live matches");

    let drained = tokio::time::timeout(MATCH_SHUTDOWN_TIMEOUT, async {
        while registry.active_matches() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    if drained.is_err() {
        warn!(remaining = registry.active_matches(), "Matches still running at shutdown");
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
