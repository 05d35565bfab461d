//! C6 — Kernel: the ambient dependency container wired up once at process start and shared
//! (via `Arc`) with every task the process spawns.
//!
//! Grounded on the teacher's `ServerKernel` (packages/server/src/kernel/mod.rs and friends): a
//! single struct holding the DB pool and every boot-time registry, constructed once in `main`
//! and handed to whatever needs it rather than threaded through global statics.

use std::sync::Arc;

use sqlx::PgPool;

use crate::jobs::WorkerRegistry;
use crate::services::ServiceRegistry;
use crate::store::PgStore;

/// Everything the Job Engine and Service Engine need to run, built once at startup.
pub struct OrchestratorKernel {
    pub store: Arc<PgStore>,
    pub workers: Arc<WorkerRegistry>,
    pub services: Arc<ServiceRegistry>,
}

impl OrchestratorKernel {
    pub fn new(pool: PgPool, workers: WorkerRegistry, services: ServiceRegistry) -> Self {
        Self {
            store: Arc::new(PgStore::new(pool)),
            workers: Arc::new(workers),
            services: Arc::new(services),
        }
    }
}
