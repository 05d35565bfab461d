//! C4 — ServiceContext: owns one service from claim through its iteration loop to a persisted
//! terminal status.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::service_impl::ServiceRegistry;
use crate::store::ServiceStore;

pub struct ServiceContext;

impl ServiceContext {
    /// Claim `service_id`, run its ServiceImpl (`start` once, then `process_iteration` until
    /// `cancel` fires), and record the terminal status.
    ///
    /// On cooperative cancellation the terminal status is `Inactive` (a clean stop), not
    /// `Failed` — only a `process_iteration`/`start` error that isn't cancellation itself marks
    /// the row `Failed`. As with `JobContext::run`, every exit path converges on one
    /// `close_inactive`/`close_failed` tail call since there is no async `Drop` to lean on.
    pub async fn run(
        store: &dyn ServiceStore,
        registry: &ServiceRegistry,
        service_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<()> {
        let service = store.claim(service_id).await?;

        let outcome = Self::drive(registry, &service, &cancel).await;

        match outcome {
            Ok(()) => store.close_inactive(service.id).await,
            Err(e) => {
                store.close_failed(service.id, &e.to_string()).await?;
                Ok(())
            }
        }
    }

    async fn drive(
        registry: &ServiceRegistry,
        service: &crate::model::Service,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let implementation = registry.get(&service.service_type)?;

        implementation.start(&service.parameters).await?;

        loop {
            if cancel.is_cancelled() {
                debug!(service_id = %service.id, "service context: cancelled, invoking stop()");
                implementation.stop().await?;
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(service_id = %service.id, "service context: cancelled mid-iteration, invoking stop()");
                    implementation.stop().await?;
                    return Ok(());
                }
                result = implementation.process_iteration(&service.parameters, cancel) => {
                    result?;
                }
            }

            if let Some(delay) = implementation.inter_iteration_delay(&service.parameters) {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        implementation.stop().await?;
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            // A store-level heartbeat write happens out-of-band via a companion task in
            // `ServiceEngine`, not here — `updateHeartbeat` is documented as safe to call
            // concurrently with `executeService` precisely so this loop never has to.
        }
    }
}
