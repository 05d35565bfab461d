//! C1 — Store: relational persistence of the `jobs` and `services` queues.
//!
//! `JobStore`/`ServiceStore` are policy-free traits (claim, scan, mutate); `PgStore` is the
//! one production implementation, backed by a `sqlx::PgPool`. Keeping the traits separate from
//! the concrete pool lets engine unit tests swap in an in-memory double without a live database
//! (see `testing` module at the bottom).

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::model::{Job, JobStatus, Service, ServiceCommand, ServiceStatus};

/// Claim, scan, and mutate operations the JobEngine/JobContext need from the store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Candidates for dispatch: `status = Open`, excluding ids already in-flight, ordered
    /// `priority DESC, created_at ASC`, limited to `limit`.
    async fn fetch_open_candidates(&self, exclude: &HashSet<Uuid>, limit: i64) -> Result<Vec<Job>>;

    /// Lock and claim a single job row. Returns `IllegalState` if the row isn't `Open`,
    /// `NotFound` if it doesn't exist. On success the row is written `Running`/`started_at=now()`
    /// and committed before this returns.
    async fn claim(&self, job_id: Uuid) -> Result<Job>;

    /// Insert each spec as a new `Open` job row with `parent_job_id = parent_id`, in one
    /// transaction.
    async fn create_children(&self, parent_id: Uuid, specs: Vec<NewChildJob>) -> Result<()>;

    /// Terminal success: `status=Completed`, `completed_at=now()`.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Terminal failure: `status=Failed`, `completed_at=now()`, `error=message`.
    async fn fail(&self, job_id: Uuid, message: &str) -> Result<()>;
}

/// A child job about to be inserted by `JobStore::create_children`.
#[derive(Debug, Clone)]
pub struct NewChildJob {
    pub job_type: String,
    pub parameters: serde_json::Value,
    pub priority: i32,
}

/// Claim, scan, and mutate operations the ServiceEngine/ServiceContext need from the store.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Idempotent boot-time seeding: insert a row for `service_type` only if one doesn't
    /// already exist (see spec open question 4).
    async fn seed_if_absent(&self, service_type: &str, parameters: serde_json::Value) -> Result<()>;

    /// Lock and claim a single service row. `IllegalState` unless `status in {Inactive, Failed}`.
    /// On success: `status=Active`, `started_at=now()`, `last_heartbeat_at=now()`, committed.
    async fn claim(&self, service_id: Uuid) -> Result<Service>;

    /// One-shot write of `last_heartbeat_at = now()`.
    async fn update_heartbeat(&self, service_id: Uuid) -> Result<()>;

    /// Terminal success (graceful stop / cancellation): `status=Inactive`.
    async fn close_inactive(&self, service_id: Uuid) -> Result<()>;

    /// Terminal failure: `status=Failed`, `error=message`.
    async fn close_failed(&self, service_id: Uuid, message: &str) -> Result<()>;

    /// Services with `command=Start` and `status in {Inactive, Failed}`, limited to `limit`.
    async fn fetch_start_candidates(&self, limit: i64) -> Result<Vec<Service>>;

    /// Clears the command on a row after the start pass has spawned its task.
    async fn clear_command(&self, service_id: Uuid) -> Result<()>;

    /// Services with `command=Stop` and `status=Active`.
    async fn fetch_stop_candidates(&self) -> Result<Vec<Service>>;

    /// Stop pass: mark a row `SHUTTING_DOWN` and clear its command (task is being cancelled
    /// out-of-band by the caller).
    async fn mark_shutting_down(&self, service_id: Uuid) -> Result<()>;

    /// Stop pass for a row with no corresponding in-process task: normalize straight to
    /// `Inactive, command=None`.
    async fn normalize_to_inactive(&self, service_id: Uuid) -> Result<()>;

    /// Services with `command=Restart`.
    async fn fetch_restart_candidates(&self) -> Result<Vec<Service>>;

    /// Restart monitor: after cancelling (or finding nothing to cancel), re-arm the row for
    /// the next start pass.
    async fn apply_restart(&self, service_id: Uuid) -> Result<()>;

    /// Active services whose heartbeat is older than `threshold` (or has never been set).
    async fn fetch_stalled(&self, threshold: DateTime<Utc>) -> Result<Vec<Service>>;

    /// Heartbeat monitor: stalled row -> `Failed, error="heartbeat timeout"`.
    async fn mark_stalled(&self, service_id: Uuid) -> Result<()>;

    /// Shutdown: in one transaction, every row `status in {Active, ShuttingDown}` -> `Inactive,
    /// command=None`.
    async fn normalize_all_on_shutdown(&self) -> Result<()>;
}

/// The one production Store: a `sqlx::PgPool` plus both traits implemented against it.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn fetch_open_candidates(&self, exclude: &HashSet<Uuid>, limit: i64) -> Result<Vec<Job>> {
        // `exclude` is re-checked per-candidate by the caller (spec §4.3 step 3); fetching a
        // slightly larger batch here keeps the query itself simple and index-friendly.
        let fetch_limit = limit + exclude.len() as i64;
        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, parameters, priority, retry_count, parent_job_id,
                   created_at, updated_at, started_at, completed_at, error
            FROM jobs
            WHERE status = 'open'
            ORDER BY priority DESC, created_at ASC
            LIMIT $1
            "#,
        )
        .bind(fetch_limit.max(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|j| !exclude.contains(&j.id))
            .take(limit as usize)
            .collect())
    }

    async fn claim(&self, job_id: Uuid) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, parameters, priority, retry_count, parent_job_id,
                   created_at, updated_at, started_at, completed_at, error
            FROM jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let job = row.ok_or(OrchestratorError::NotFound {
            kind: "job",
            id: job_id,
        })?;

        if job.status != JobStatus::Open {
            return Err(OrchestratorError::IllegalState {
                kind: "job",
                id: job_id,
                status: format!("{:?}", job.status),
            }
            .into());
        }

        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING id, job_type, status, parameters, priority, retry_count, parent_job_id,
                      created_at, updated_at, started_at, completed_at, error
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claimed)
    }

    async fn create_children(&self, parent_id: Uuid, specs: Vec<NewChildJob>) -> Result<()> {
        if specs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for spec in specs {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, job_type, status, parameters, priority, parent_job_id, created_at, updated_at)
                VALUES ($1, $2, 'open', $3, $4, $5, NOW(), NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(spec.job_type)
            .bind(spec.parameters)
            .bind(spec.priority)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = NOW(), updated_at = NOW(), error = $2 WHERE id = $1",
        )
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for PgStore {
    async fn seed_if_absent(&self, service_type: &str, parameters: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO services (id, service_type, status, command, parameters, created_at, updated_at)
            VALUES ($1, $2, 'inactive', 'none', $3, NOW(), NOW())
            ON CONFLICT (service_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(service_type)
        .bind(parameters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(&self, service_id: Uuid) -> Result<Service> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, service_type, status, command, command_issued_at, parameters,
                   created_at, updated_at, started_at, last_heartbeat_at, error
            FROM services
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(service_id)
        .fetch_optional(&mut *tx)
        .await?;

        let service = row.ok_or(OrchestratorError::NotFound {
            kind: "service",
            id: service_id,
        })?;

        if !matches!(service.status, ServiceStatus::Inactive | ServiceStatus::Failed) {
            return Err(OrchestratorError::IllegalState {
                kind: "service",
                id: service_id,
                status: format!("{:?}", service.status),
            }
            .into());
        }

        let claimed = sqlx::query_as::<_, Service>(
            r#"
            UPDATE services
            SET status = 'active', started_at = NOW(), last_heartbeat_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING id, service_type, status, command, command_issued_at, parameters,
                      created_at, updated_at, started_at, last_heartbeat_at, error
            "#,
        )
        .bind(service_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claimed)
    }

    async fn update_heartbeat(&self, service_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE services SET last_heartbeat_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close_inactive(&self, service_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE services SET status = 'inactive', updated_at = NOW() WHERE id = $1")
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close_failed(&self, service_id: Uuid, message: &str) -> Result<()> {
        sqlx::query("UPDATE services SET status = 'failed', error = $2, updated_at = NOW() WHERE id = $1")
            .bind(service_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_start_candidates(&self, limit: i64) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, service_type, status, command, command_issued_at, parameters,
                   created_at, updated_at, started_at, last_heartbeat_at, error
            FROM services
            WHERE command = 'start' AND status IN ('inactive', 'failed')
            ORDER BY command_issued_at ASC NULLS LAST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clear_command(&self, service_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE services SET command = 'none', command_issued_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_stop_candidates(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, service_type, status, command, command_issued_at, parameters,
                   created_at, updated_at, started_at, last_heartbeat_at, error
            FROM services
            WHERE command = 'stop' AND status = 'active'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_shutting_down(&self, service_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = 'shutting_down', command = 'none', command_issued_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn normalize_to_inactive(&self, service_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = 'inactive', command = 'none', command_issued_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_restart_candidates(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, service_type, status, command, command_issued_at, parameters,
                   created_at, updated_at, started_at, last_heartbeat_at, error
            FROM services
            WHERE command = 'restart'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn apply_restart(&self, service_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = 'inactive', command = 'start', command_issued_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_stalled(&self, threshold: DateTime<Utc>) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, service_type, status, command, command_issued_at, parameters,
                   created_at, updated_at, started_at, last_heartbeat_at, error
            FROM services
            WHERE status = 'active' AND (last_heartbeat_at < $1 OR last_heartbeat_at IS NULL)
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_stalled(&self, service_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = 'failed', error = 'heartbeat timeout', updated_at = NOW() WHERE id = $1",
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn normalize_all_on_shutdown(&self) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE services
            SET status = 'inactive', command = 'none', command_issued_at = NULL, updated_at = NOW()
            WHERE status IN ('active', 'shutting_down')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
