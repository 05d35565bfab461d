//! The orchestrator process: wires config -> kernel -> schema migration -> service seeding ->
//! both engines -> signal-triggered graceful shutdown.
//!
//! Concrete Workers and ServiceImpls are out of scope for this crate (see spec §1) — this
//! binary boots with empty registries. A deployment embedding `orchestrator_core` as a library
//! registers its own media-pipeline Workers and ServiceImpls before calling `run`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_core::jobs::{JobEngine, JobEngineConfig, WorkerRegistry};
use orchestrator_core::services::{ServiceEngine, ServiceEngineConfig, ServiceRegistry};
use orchestrator_core::store::PgStore;
use orchestrator_core::{OrchestratorConfig, OrchestratorKernel};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "orchestrator: fatal error");
        std::process::exit(1);
    }
    std::process::exit(0);
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("orchestrator: starting up");

    let config = OrchestratorConfig::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run schema migrations")?;

    // A real deployment registers its concrete media-pipeline Workers/ServiceImpls here before
    // calling `run`; see spec §6 ("Engine startup fails fast if any enum value lacks a
    // registered factory it might encounter").
    let workers = WorkerRegistry::new();
    let services = ServiceRegistry::new();
    let kernel = OrchestratorKernel::new(pool.clone(), workers, services);

    // Default service seeding is a no-op in this crate: the concrete service_type tags and
    // their default parameters belong to the embedding deployment, not to the orchestrator
    // core. `PgStore::seed_if_absent` is the extension point a deployment calls per default
    // service before spawning the engines.
    let store: Arc<PgStore> = kernel.store.clone();

    let job_engine = Arc::new(JobEngine::new(
        store.clone(),
        kernel.workers.clone(),
        JobEngineConfig {
            max_concurrent: config.max_concurrent_jobs,
            poll_interval: Duration::from_secs(config.job_poll_interval_secs),
        },
    ));

    let service_engine = Arc::new(ServiceEngine::new(
        store.clone(),
        kernel.services.clone(),
        ServiceEngineConfig {
            max_concurrent: config.max_concurrent_services,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            supervision_interval: Duration::from_secs(config.heartbeat_interval_secs),
            restart_poll_interval: Duration::from_secs(5),
        },
    ));

    let shutdown = CancellationToken::new();

    let job_task = tokio::spawn({
        let job_engine = job_engine.clone();
        let shutdown = shutdown.clone();
        async move { job_engine.run(shutdown).await }
    });
    let service_task = tokio::spawn({
        let service_engine = service_engine.clone();
        let shutdown = shutdown.clone();
        async move { service_engine.run(shutdown).await }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("orchestrator: shutdown signal received, stopping engines");
    shutdown.cancel();

    let shutdown_budget = Duration::from_secs(10);
    let drained = tokio::time::timeout(shutdown_budget, async {
        let _ = tokio::join!(job_task, service_task);
    })
    .await;

    if drained.is_err() {
        tracing::warn!("orchestrator: shutdown exceeded 10s budget, exiting anyway");
    }

    tracing::info!("orchestrator: shutdown complete");
    Ok(())
}

/// Waits for either SIGINT (ctrl-c) or, on unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
