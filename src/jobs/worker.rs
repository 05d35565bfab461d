//! The Worker contract and the boot-time `job_type -> Worker` registry.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::store::NewChildJob;

/// A child job a Worker wants spawned once its own job commits success.
#[derive(Debug, Clone)]
pub struct ChildJobSpec {
    pub job_type: String,
    pub params: Value,
    pub priority: i32,
}

impl ChildJobSpec {
    pub fn new(job_type: impl Into<String>, params: Value, priority: i32) -> Self {
        Self {
            job_type: job_type.into(),
            params,
            priority,
        }
    }
}

impl From<ChildJobSpec> for NewChildJob {
    fn from(spec: ChildJobSpec) -> Self {
        NewChildJob {
            job_type: spec.job_type,
            parameters: spec.params,
            priority: spec.priority,
        }
    }
}

/// The code that executes one job type.
///
/// Implementations receive the job's raw JSON `parameters` and are responsible for their own
/// deserialization — this keeps the registry and the engine ignorant of per-type parameter
/// shapes (per the ambient-singleton/Store design note), matching how `job_type` alone selects
/// both the Worker *and* how its parameters are interpreted.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute the job. May suspend arbitrarily long on I/O. Must be idempotent under
    /// at-least-once execution. Failure is signaled by returning `Err`.
    async fn execute(&self, params: Value) -> Result<Vec<ChildJobSpec>>;
}

/// A `job_type -> Worker` factory, immutable after boot.
///
/// Workers are typically stateless (`Arc<dyn Worker>` shared across every job of that type),
/// so the registry stores instances directly rather than factory closures — the teacher's
/// `CommandRegistry` stores per-call deserializer closures because each command is a distinct
/// Rust type; here a single `job_type` maps to one long-lived Worker instance instead.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, std::sync::Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Worker for `job_type`.
    ///
    /// # Panics
    /// Panics if a Worker is already registered for this type — registries are populated once
    /// at boot and a duplicate registration is a programming error, not a runtime condition.
    pub fn register(&mut self, job_type: impl Into<String>, worker: std::sync::Arc<dyn Worker>) {
        let job_type = job_type.into();
        if self.workers.contains_key(&job_type) {
            panic!("worker already registered for job_type: {job_type}");
        }
        self.workers.insert(job_type, worker);
    }

    /// Look up the Worker for `job_type`, or `UnknownType` if none is registered.
    pub fn get(&self, job_type: &str) -> Result<std::sync::Arc<dyn Worker>> {
        self.workers
            .get(job_type)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::UnknownType {
                    kind: "job",
                    type_tag: job_type.to_string(),
                }
                .into()
            })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoopWorker;

    #[async_trait]
    impl Worker for NoopWorker {
        async fn execute(&self, _params: Value) -> Result<Vec<ChildJobSpec>> {
            Ok(vec![])
        }
    }

    #[test]
    fn unregistered_type_is_unknown_type_error() {
        let registry = WorkerRegistry::new();
        let err = registry.get("nonexistent").unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn registered_type_resolves() {
        let mut registry = WorkerRegistry::new();
        registry.register("scan_directory", Arc::new(NoopWorker));
        assert!(registry.get("scan_directory").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = WorkerRegistry::new();
        registry.register("scan_directory", Arc::new(NoopWorker));
        registry.register("scan_directory", Arc::new(NoopWorker));
    }

    #[test]
    fn child_job_spec_converts_to_new_child_job() {
        let spec = ChildJobSpec::new("probe_file", serde_json::json!({"path": "/a"}), 3);
        let new_child: NewChildJob = spec.into();
        assert_eq!(new_child.job_type, "probe_file");
        assert_eq!(new_child.priority, 3);
    }
}
