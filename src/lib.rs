//! NetPulse -- self-hosted mobile-network diagnostics.
//!
//! This crate provides the core library for running mobile-network
//! diagnostic tests (speed, signal, coverage, roaming, API health/load):
//! the test lifecycle engine, sample sources, scheduling, persistence, and
//! the live-streaming API.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod probes;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::broadcast::ChannelBroadcaster;
use crate::config::NetPulseConfig;
use crate::engine::{Engine, TaskHandle};
use crate::probes::ProbeSet;
use crate::storage::{ResultStore, SqliteStore};

/// Start the NetPulse daemon: API server, lifecycle engine, and scheduler.
pub async fn serve(config: NetPulseConfig) -> Result<()> {
    // 1. Storage
    tracing::info!(db_path = %config.database.path, "initializing database");
    let pool = storage::open_pool(&config.database.path)?;
    let store: Arc<dyn ResultStore> = Arc::new(SqliteStore::new(pool.clone()));

    // 2. Collaborators
    let broadcaster = Arc::new(ChannelBroadcaster::new(config.engine.broadcast_capacity));
    let source = Arc::new(ProbeSet::new()?);

    // 3. Lifecycle engine (spawns its dispatcher and monitor)
    let engine = Arc::new(Engine::new(
        config.engine.clone(),
        store.clone(),
        source,
        broadcaster.clone(),
    ));

    // 4. Recurring schedules
    let scheduler = scheduler::Scheduler::new(pool);
    scheduler.seed_defaults().await?;
    let loop_handle = tokio::spawn(scheduler::run_scheduler_loop(
        scheduler.clone(),
        engine.clone(),
        store.clone(),
    ));
    engine.register_recurring(TaskHandle::new(loop_handle)).await;

    // 5. API server
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(api::AppState {
        engine: engine.clone(),
        store,
        scheduler,
        broadcaster,
    });

    tracing::info!(%addr, "netpulse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Deterministic teardown: dispatcher first, then every running test,
    // then the scheduler loop.
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
