//! Shared test infrastructure: a single Postgres container reused across every integration
//! test, migrated once. Grounded on `packages/server/tests/common/harness.rs`'s
//! `SharedTestInfra`/`OnceCell` pattern, adapted from `testcontainers` + `GenericImage` (the
//! teacher's pgvector image) to `testcontainers_modules::postgres` since this crate needs
//! plain Postgres, not pgvector.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedInfra {
    db_url: String,
    _container: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let container = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _container: container,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("shared test infra init failed") })
            .await
    }
}

/// Per-test handle: a fresh pool against the shared, already-migrated database.
pub struct TestHarness {
    pub pool: PgPool,
}

impl TestHarness {
    pub async fn new() -> Self {
        let infra = SharedInfra::get().await;
        let pool = PgPool::connect(&infra.db_url)
            .await
            .expect("failed to connect test pool");
        Self { pool }
    }

    /// Insert an `Open` job row directly (bypassing the engine) so tests can seed exact
    /// fixtures per spec §8's scenarios.
    pub async fn seed_job(&self, job_type: &str, priority: i32, params: Value) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO jobs (id, job_type, status, parameters, priority, created_at, updated_at) \
             VALUES ($1, $2, 'open', $3, $4, NOW(), NOW())",
        )
        .bind(id)
        .bind(job_type)
        .bind(params)
        .bind(priority)
        .execute(&self.pool)
        .await
        .expect("failed to seed job");
        id
    }

    /// Same as `seed_job` but with an explicit `created_at`, for priority/age ordering tests.
    pub async fn seed_job_at(
        &self,
        job_type: &str,
        priority: i32,
        params: Value,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO jobs (id, job_type, status, parameters, priority, created_at, updated_at) \
             VALUES ($1, $2, 'open', $3, $4, $5, $5)",
        )
        .bind(id)
        .bind(job_type)
        .bind(params)
        .bind(priority)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .expect("failed to seed job");
        id
    }

    pub async fn seed_service(&self, service_type: &str, params: Value) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO services (id, service_type, status, command, command_issued_at, parameters, created_at, updated_at) \
             VALUES ($1, $2, 'inactive', 'start', NOW(), $3, NOW(), NOW())",
        )
        .bind(id)
        .bind(service_type)
        .bind(params)
        .execute(&self.pool)
        .await
        .expect("failed to seed service");
        id
    }

    pub async fn job_status(&self, id: Uuid) -> String {
        sqlx::query_scalar("SELECT status::text FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("job not found")
    }

    pub async fn job_error(&self, id: Uuid) -> Option<String> {
        sqlx::query_scalar("SELECT error FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("job not found")
    }

    pub async fn child_count(&self, parent_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE parent_job_id = $1")
            .bind(parent_id)
            .fetch_one(&self.pool)
            .await
            .expect("query failed")
    }

    pub async fn running_job_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await
            .expect("query failed")
    }

    pub async fn service_status(&self, id: Uuid) -> String {
        sqlx::query_scalar("SELECT status::text FROM services WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("service not found")
    }

    pub async fn service_command(&self, id: Uuid) -> String {
        sqlx::query_scalar("SELECT command::text FROM services WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("service not found")
    }

    pub async fn service_last_heartbeat(&self, id: Uuid) -> Option<DateTime<Utc>> {
        sqlx::query_scalar("SELECT last_heartbeat_at FROM services WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("service not found")
    }

    pub async fn set_command(&self, id: Uuid, command: &str) {
        sqlx::query("UPDATE services SET command = $2, command_issued_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(command)
            .execute(&self.pool)
            .await
            .expect("failed to set command");
    }
}
