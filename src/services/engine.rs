//! C5 — ServiceEngine: the three cooperating background tasks that supervise the `services`
//! table (start/stop, restart, heartbeat liveness), plus the per-service run+heartbeat pair.
//!
//! There is no teacher analogue for a long-running supervised service — `kernel/jobs/worker.rs`
//! only ever runs one-shot commands. The per-service heartbeat companion task below is still
//! grounded on that file's `execute_with_heartbeat`: a `tokio::spawn`ed `tokio::time::interval`
//! loop raced against a `CancellationToken` via `tokio::select!`, just pointed at
//! `ServiceStore::update_heartbeat` instead of `JobStore::heartbeat`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::ServiceContext;
use super::service_impl::ServiceRegistry;
use crate::store::ServiceStore;

/// Tuning knobs for `ServiceEngine`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceEngineConfig {
    pub max_concurrent: usize,
    pub heartbeat_interval: Duration,
    /// Cadence of task A (start/stop supervision) and task C (heartbeat liveness). Task B
    /// (restart monitor) runs on its own fixed ~5s cadence regardless of this value.
    pub supervision_interval: Duration,
    pub restart_poll_interval: Duration,
}

struct RunningService {
    cancel: CancellationToken,
    run_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
}

/// Long-running supervisor for the `services` table: starts/stops services on command, restarts
/// them on request, and fails stalled ones whose heartbeat has gone quiet.
pub struct ServiceEngine {
    store: Arc<dyn ServiceStore>,
    registry: Arc<ServiceRegistry>,
    config: ServiceEngineConfig,
    running: Mutex<HashMap<Uuid, RunningService>>,
}

impl ServiceEngine {
    pub fn new(store: Arc<dyn ServiceStore>, registry: Arc<ServiceRegistry>, config: ServiceEngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Run all three supervision tasks until `shutdown` is cancelled, then drain every running
    /// service (bounded to 10s) and normalize the table before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let task_a = tokio::spawn(Arc::clone(&self).run_start_stop_loop(shutdown.clone()));
        let task_b = tokio::spawn(Arc::clone(&self).run_restart_monitor(shutdown.clone()));
        let task_c = tokio::spawn(Arc::clone(&self).run_heartbeat_monitor(shutdown.clone()));

        let _ = tokio::join!(task_a, task_b, task_c);

        info!("service engine: supervision tasks stopped, draining running services");
        self.drain_running().await;

        if let Err(e) = self.store.normalize_all_on_shutdown().await {
            error!(error = %e, "service engine: failed to normalize services table on shutdown");
        }

        Ok(())
    }

    /// Task A: every `supervision_interval`, start services with `command=Start` (bounded by
    /// remaining concurrency) and stop services with `command=Stop`.
    async fn run_start_stop_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            if let Err(e) = self.process_stop_candidates().await {
                error!(error = %e, "service engine: stop pass failed");
            }
            if let Err(e) = self.process_start_candidates().await {
                error!(error = %e, "service engine: start pass failed");
            }

            if Self::sleep_or_cancelled(self.config.supervision_interval, &shutdown).await {
                return;
            }
        }
    }

    async fn process_start_candidates(&self) -> Result<()> {
        let free = {
            let running = self.running.lock().await;
            self.config.max_concurrent.saturating_sub(running.len())
        };
        if free == 0 {
            return Ok(());
        }

        let candidates = self.store.fetch_start_candidates(free as i64).await?;
        for service in candidates {
            let mut running = self.running.lock().await;
            if running.contains_key(&service.id) {
                continue;
            }
            self.store.clear_command(service.id).await?;
            let handle = self.spawn_service(service.id);
            running.insert(service.id, handle);
        }
        Ok(())
    }

    async fn process_stop_candidates(&self) -> Result<()> {
        let candidates = self.store.fetch_stop_candidates().await?;
        for service in candidates {
            let mut running = self.running.lock().await;
            match running.remove(&service.id) {
                Some(handle) => {
                    self.store.mark_shutting_down(service.id).await?;
                    handle.cancel.cancel();
                    drop(running);
                    let _ = handle.run_handle.await;
                    let _ = handle.heartbeat_handle.await;
                }
                None => {
                    // No in-process task for this row (e.g. after a restart) — normalize
                    // directly rather than waiting on a task that doesn't exist.
                    drop(running);
                    self.store.normalize_to_inactive(service.id).await?;
                }
            }
        }
        Ok(())
    }

    /// Task B: every ~5s, restart services with `command=Restart` — cancel any running task,
    /// then re-arm the row for the next start pass.
    async fn run_restart_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            if let Err(e) = self.process_restart_candidates().await {
                error!(error = %e, "service engine: restart pass failed");
            }

            if Self::sleep_or_cancelled(self.config.restart_poll_interval, &shutdown).await {
                return;
            }
        }
    }

    async fn process_restart_candidates(&self) -> Result<()> {
        let candidates = self.store.fetch_restart_candidates().await?;
        for service in candidates {
            let mut running = self.running.lock().await;
            if let Some(handle) = running.remove(&service.id) {
                handle.cancel.cancel();
                drop(running);
                let _ = handle.run_handle.await;
                let _ = handle.heartbeat_handle.await;
            }
            self.store.apply_restart(service.id).await?;
        }
        Ok(())
    }

    /// Task C: every `heartbeat_interval`, fail any `Active` service whose heartbeat is older
    /// than 3x that interval.
    async fn run_heartbeat_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            if let Err(e) = self.process_stalled().await {
                error!(error = %e, "service engine: heartbeat monitor pass failed");
            }

            if Self::sleep_or_cancelled(self.config.heartbeat_interval, &shutdown).await {
                return;
            }
        }
    }

    async fn process_stalled(&self) -> Result<()> {
        let threshold = Utc::now() - chrono::Duration::from_std(self.config.heartbeat_interval * 3)?;
        let stalled = self.store.fetch_stalled(threshold).await?;
        for service in stalled {
            warn!(service_id = %service.id, "service engine: heartbeat stalled, marking failed");
            let mut running = self.running.lock().await;
            if let Some(handle) = running.remove(&service.id) {
                handle.cancel.cancel();
            }
            drop(running);
            self.store.mark_stalled(service.id).await?;
        }
        Ok(())
    }

    /// Spawn a service's run task and its companion heartbeat task, sharing one cancellation
    /// token between them.
    fn spawn_service(&self, service_id: Uuid) -> RunningService {
        let cancel = CancellationToken::new();

        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let run_cancel = cancel.clone();
        let run_handle = tokio::spawn(async move {
            if let Err(e) = ServiceContext::run(&*store, &registry, service_id, run_cancel).await {
                error!(service_id = %service_id, error = %e, "service engine: error recording service outcome");
            }
        });

        let store = Arc::clone(&self.store);
        let heartbeat_cancel = cancel.clone();
        let heartbeat_interval = self.config.heartbeat_interval / 2;
        let heartbeat_handle = tokio::spawn(async move {
            loop {
                if Self::sleep_or_cancelled(heartbeat_interval, &heartbeat_cancel).await {
                    break;
                }
                match store.update_heartbeat(service_id).await {
                    Ok(()) => {}
                    Err(e) => {
                        error!(service_id = %service_id, error = %e, "service engine: heartbeat write failed");
                        if Self::sleep_or_cancelled(Duration::from_secs(5), &heartbeat_cancel).await {
                            break;
                        }
                    }
                }
            }
            debug!(service_id = %service_id, "service engine: heartbeat task stopped");
        });

        RunningService {
            cancel,
            run_handle,
            heartbeat_handle,
        }
    }

    /// Cancel and await every currently-running service, bounded to 10s total.
    async fn drain_running(&self) {
        let handles: Vec<(Uuid, RunningService)> = {
            let mut running = self.running.lock().await;
            running.drain().collect()
        };

        for (_, handle) in &handles {
            handle.cancel.cancel();
        }

        let drain = async {
            for (service_id, handle) in handles {
                if let Err(e) = handle.run_handle.await {
                    error!(service_id = %service_id, error = %e, "service engine: run task panicked");
                }
                if let Err(e) = handle.heartbeat_handle.await {
                    error!(service_id = %service_id, error = %e, "service engine: heartbeat task panicked");
                }
            }
        };

        if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
            warn!("service engine: shutdown drain exceeded 10s budget, proceeding anyway");
        }
    }

    async fn sleep_or_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_copyable_and_cheap() {
        let config = ServiceEngineConfig {
            max_concurrent: 4,
            heartbeat_interval: Duration::from_secs(30),
            supervision_interval: Duration::from_secs(2),
            restart_poll_interval: Duration::from_secs(5),
        };
        let copy = config;
        assert_eq!(copy.max_concurrent, 4);
    }
}
