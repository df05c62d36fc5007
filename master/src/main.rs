mod aggregator;
mod config;
mod coordinator;
mod failover;
mod handlers;
mod metrics;
mod monitor;
mod registry;
mod scheduler;
mod state;

use anyhow::Context;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::CoordinatorConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let config = CoordinatorConfig::from_env();
    info!(
        "config: heartbeat_timeout={}s monitor={}s schedule={}ms task_timeout={:?} chunks={}",
        config.heartbeat_timeout.num_seconds(),
        config.monitor_interval_secs,
        config.schedule_interval_ms,
        config.task_timeout.map(|d| d.num_seconds()),
        config.default_chunk_count
    );

    let bind_addr = config.bind_addr.clone();
    let monitor_every = Duration::from_secs(config.monitor_interval_secs);
    let schedule_every = Duration::from_millis(config.schedule_interval_ms);
    let state = AppState::new(config);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // detector de fallos y scheduler en segundo plano
    tokio::spawn(failover::run_monitor_loop(state.clone(), monitor_every));
    tokio::spawn(failover::run_schedule_loop(state.clone(), schedule_every));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", bind_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
