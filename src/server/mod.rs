//! HTTP server support (standalone + embeddable).
//!
//! - **Standalone**: `rep-swarm-server` binary calls `run()`
//! - **Embedded**: host Axum app calls `router(state)` (and may nest it)

mod http;
mod http_errors;
mod http_types;
mod state;

pub use http::router;
pub use state::{build_state_from_env, build_state_with_pool, AppState, SwarmOrchestrator};

use crate::infrastructure::AppConfig;
use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Cadence of the lazy quota-reset sweep.
const RESET_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Standalone entrypoint for the `rep-swarm-server` binary.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("load config")?;
    let state = build_state_from_env(config.clone()).await?;

    spawn_event_drain(&state);
    spawn_reset_sweeper(&state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("parse listen address")?;
    let listener = TcpListener::bind(addr).await.context("bind listener")?;

    info!(
        host = %config.server_host,
        port = config.server_port,
        "Server running"
    );
    info!(
        docs = %format!("http://{}:{}/docs", config.server_host, config.server_port),
        "API docs"
    );

    let app = router(state);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

/// Mirror orchestrator events into the trace log so a headless deployment
/// still has a record of task completions and failures.
fn spawn_event_drain(state: &AppState) {
    let mut events = state.orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "orchestrator event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event drain lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_reset_sweeper(state: &AppState) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RESET_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = orchestrator.run_reset_sweep().await {
                warn!(error = %error, "Quota reset sweep failed");
            }
        }
    });
}
