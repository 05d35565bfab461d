//! C3 — JobEngine: the poll loop, concurrency cap, and per-job dispatch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::context::JobContext;
use super::worker::WorkerRegistry;
use crate::error::OrchestratorError;
use crate::store::JobStore;

/// Tuning knobs for `JobEngine`.
#[derive(Debug, Clone, Copy)]
pub struct JobEngineConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
}

/// Long-running dispatcher: polls for `Open` jobs, enforces `max_concurrent`, and dispatches
/// each through a `JobContext`.
pub struct JobEngine {
    store: Arc<dyn JobStore>,
    registry: Arc<WorkerRegistry>,
    config: JobEngineConfig,
    active: Mutex<HashSet<Uuid>>,
    semaphore: Arc<Semaphore>,
}

impl JobEngine {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<WorkerRegistry>, config: JobEngineConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            store,
            registry,
            config,
            active: Mutex::new(HashSet::new()),
            semaphore,
        }
    }

    /// Run until `shutdown` is cancelled. New candidates stop being fetched once cancelled;
    /// jobs already dispatched are allowed to run to completion before this returns.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let free = {
                let active = self.active.lock().await;
                self.config.max_concurrent.saturating_sub(active.len())
            };

            if free == 0 {
                if Self::sleep_or_cancelled(self.config.poll_interval, &shutdown).await {
                    break;
                }
                continue;
            }

            let snapshot = self.active.lock().await.clone();
            let candidates = match self.store.fetch_open_candidates(&snapshot, free as i64).await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "job engine: failed to fetch open candidates");
                    if Self::sleep_or_cancelled(self.config.poll_interval, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            for job in candidates {
                // Belt-and-suspenders: the row may have entered `active` between the query
                // above and now, dispatched by a previous iteration's freshly-spawned task.
                let admitted = {
                    let mut active = self.active.lock().await;
                    if active.contains(&job.id) {
                        false
                    } else {
                        active.insert(job.id);
                        true
                    }
                };
                if !admitted {
                    continue;
                }

                let engine = Arc::clone(&self);
                let job_id = job.id;
                in_flight.spawn(async move {
                    engine.process_one(job_id).await;
                });
            }

            // Reap finished tasks without blocking the poll cadence.
            while in_flight.try_join_next().is_some() {}

            if Self::sleep_or_cancelled(self.config.poll_interval, &shutdown).await {
                break;
            }
        }

        debug!("job engine: draining in-flight jobs before shutdown");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    async fn process_one(&self, job_id: Uuid) {
        let _permit = self.semaphore.acquire().await;

        match JobContext::run(&*self.store, &self.registry, job_id).await {
            Ok(()) => {
                debug!(job_id = %job_id, "job engine: job reached terminal state");
            }
            Err(e) => {
                if let Some(OrchestratorError::IllegalState { .. }) = e.downcast_ref() {
                    warn!(job_id = %job_id, "job engine: lost claim race, dropping candidate");
                } else if let Some(OrchestratorError::NotFound { .. }) = e.downcast_ref() {
                    warn!(job_id = %job_id, "job engine: candidate vanished before claim");
                } else {
                    error!(job_id = %job_id, error = %e, "job engine: error recording job outcome");
                }
            }
        }

        self.active.lock().await.remove(&job_id);
    }

    /// Sleeps for `duration`, or returns early (with `true`) if `shutdown` fires first.
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
        let config = JobEngineConfig {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(1),
        };
        let copy = config;
        assert_eq!(copy.max_concurrent, 3);
    }
}
