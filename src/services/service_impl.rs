//! The ServiceImpl contract and the boot-time `service_type -> ServiceImpl` registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;

/// The code that implements one long-running service type.
///
/// `process_iteration` is called repeatedly by `ServiceContext::execute_service` until the
/// service's cancellation token fires; implementations that block/sleep internally (a
/// self-pacing watcher, say) should race that wait against `cancel` rather than ignoring it, so
/// cancellation is observed promptly instead of only between iterations.
#[async_trait]
pub trait ServiceImpl: Send + Sync {
    /// One-time initialization: open observers, warm caches, load known state. May fail.
    async fn start(&self, params: &Value) -> Result<()>;

    /// One unit of work. May block/sleep internally; should select against `cancel` at its own
    /// suspension points rather than only being cancelled between calls.
    async fn process_iteration(&self, params: &Value, cancel: &CancellationToken) -> Result<()>;

    /// Idempotent resource release. Default is a no-op — most services have nothing to release
    /// beyond what `process_iteration`'s own cancellation handling already covers.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// The per-type inter-iteration sleep, if this service type wants the context to pace it
    /// rather than self-pacing inside `process_iteration` (e.g. a periodic sweeper configured
    /// via `cleanup_interval`). Returns `None` for a self-pacing implementation (e.g. a watcher
    /// that blocks on an event inside `process_iteration`) — no extra sleep is applied.
    fn inter_iteration_delay(&self, _params: &Value) -> Option<Duration> {
        None
    }
}

/// A `service_type -> ServiceImpl` factory, immutable after boot.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn ServiceImpl>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ServiceImpl for `service_type`.
    ///
    /// # Panics
    /// Panics on duplicate registration — registries are populated once at boot.
    pub fn register(&mut self, service_type: impl Into<String>, service: Arc<dyn ServiceImpl>) {
        let service_type = service_type.into();
        if self.services.contains_key(&service_type) {
            panic!("service already registered for service_type: {service_type}");
        }
        self.services.insert(service_type, service);
    }

    /// Look up the ServiceImpl for `service_type`, or `UnknownType` if none is registered.
    pub fn get(&self, service_type: &str) -> Result<Arc<dyn ServiceImpl>> {
        self.services
            .get(service_type)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::UnknownType {
                    kind: "service",
                    type_tag: service_type.to_string(),
                }
                .into()
            })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopService;

    #[async_trait]
    impl ServiceImpl for NoopService {
        async fn start(&self, _params: &Value) -> Result<()> {
            Ok(())
        }

        async fn process_iteration(&self, _params: &Value, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_type_is_unknown_type_error() {
        let registry = ServiceRegistry::new();
        let err = registry.get("nonexistent").unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn registered_type_resolves() {
        let mut registry = ServiceRegistry::new();
        registry.register("watchdog", Arc::new(NoopService));
        assert!(registry.get("watchdog").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = ServiceRegistry::new();
        registry.register("watchdog", Arc::new(NoopService));
        registry.register("watchdog", Arc::new(NoopService));
    }

    #[tokio::test]
    async fn default_stop_is_a_noop() {
        let svc = NoopService;
        assert!(svc.stop().await.is_ok());
    }

    #[test]
    fn default_inter_iteration_delay_is_none() {
        let svc = NoopService;
        assert!(svc.inter_iteration_delay(&Value::Null).is_none());
    }
}
