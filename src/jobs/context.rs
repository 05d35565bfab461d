//! C2 — JobContext: owns one job from claim to persisted terminal outcome.
//!
//! Rust has no async `Drop`, so the "open returns a claim; a block runs; close is guaranteed on
//! every exit path" discipline from the spec is implemented as a single driver function,
//! `JobContext::run`, rather than a guard value. Every internal early return converges on one
//! `complete`/`fail` tail call.

use anyhow::Result;
use uuid::Uuid;

use super::worker::WorkerRegistry;
use crate::store::JobStore;

/// Truncate an error's display string to a short, storable description — mirrors the spec's
/// `short_description(e)` used when persisting the `error` column.
fn short_description(err: &anyhow::Error) -> String {
    const MAX_LEN: usize = 2000;
    let full = err.to_string();
    if full.len() > MAX_LEN {
        format!("{}...", &full[..MAX_LEN])
    } else {
        full
    }
}

pub struct JobContext;

impl JobContext {
    /// Claim `job_id`, run its Worker, persist children, and record the terminal outcome.
    ///
    /// Returns `Err` if the claim itself failed (`NotFound`/`IllegalState` — a benign race the
    /// caller should log and move past) or if persisting the terminal outcome failed (a store
    /// error, which the caller's loop boundary will catch). A Worker failure is *not* returned
    /// as `Err` from this function: it is caught here and turned into a persisted `Failed` row,
    /// since recording that outcome is itself part of "close must run on every exit path".
    pub async fn run(store: &dyn JobStore, registry: &WorkerRegistry, job_id: Uuid) -> Result<()> {
        let job = store.claim(job_id).await?;

        let outcome = async {
            let worker = registry.get(&job.job_type)?;
            let children = worker.execute(job.parameters.clone()).await?;
            if !children.is_empty() {
                let new_children = children.into_iter().map(Into::into).collect();
                store.create_children(job.id, new_children).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match outcome {
            Ok(()) => store.complete(job.id).await,
            Err(e) => {
                store.fail(job.id, &short_description(&e)).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_description_truncates_long_errors() {
        let err = anyhow::anyhow!("x".repeat(3000));
        let desc = short_description(&err);
        assert!(desc.len() <= 2004);
        assert!(desc.ends_with("..."));
    }

    #[test]
    fn short_description_passes_through_short_errors() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(short_description(&err), "boom");
    }
}
