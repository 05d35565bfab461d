//! Operator CLI: the external tool an operator uses to exercise the "operator interface"
//! contract in spec §6 — mutating `jobs`/`services` rows directly, the same way any other
//! external tool is free to.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orchestrator_cli")]
#[command(about = "Operator CLI for the job/service orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new OPEN job.
    Enqueue {
        job_type: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Issue START/STOP/RESTART to a service.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// List jobs, optionally filtered by status.
    Jobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// List services.
    Services,
}

#[derive(Subcommand)]
enum ServiceAction {
    Start { service_id: Uuid },
    Stop { service_id: Uuid },
    Restart { service_id: Uuid },
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<Vec<JobRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<Vec<ServiceRow>>,
}

#[derive(Serialize, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    priority: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize, sqlx::FromRow)]
struct ServiceRow {
    id: Uuid,
    service_type: String,
    status: String,
    command: String,
}

fn output(resp: Response) {
    println!("{}", serde_json::to_string(&resp).unwrap());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let pool = connect_pool().await?;

    match cli.command {
        Commands::Enqueue {
            job_type,
            params,
            priority,
        } => cmd_enqueue(&pool, &job_type, &params, priority).await,
        Commands::Service { action } => cmd_service(&pool, action).await,
        Commands::Jobs { status, limit } => cmd_jobs(&pool, status.as_deref(), limit).await,
        Commands::Services => cmd_services(&pool).await,
    }
}

async fn connect_pool() -> Result<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn cmd_enqueue(pool: &PgPool, job_type: &str, params: &str, priority: i32) -> Result<()> {
    let parameters: serde_json::Value =
        serde_json::from_str(params).context("--params must be valid JSON")?;
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO jobs (id, job_type, status, parameters, priority, created_at, updated_at)
        VALUES ($1, $2, 'open', $3, $4, NOW(), NOW())
        "#,
    )
    .bind(id)
    .bind(job_type)
    .bind(parameters)
    .bind(priority)
    .execute(pool)
    .await
    .context("failed to insert job")?;

    output(Response {
        success: true,
        message: Some(format!("enqueued job {id}")),
        jobs: None,
        services: None,
    });
    Ok(())
}

async fn cmd_service(pool: &PgPool, action: ServiceAction) -> Result<()> {
    let (service_id, command) = match action {
        ServiceAction::Start { service_id } => (service_id, "start"),
        ServiceAction::Stop { service_id } => (service_id, "stop"),
        ServiceAction::Restart { service_id } => (service_id, "restart"),
    };

    let rows_affected = sqlx::query(
        "UPDATE services SET command = $2, command_issued_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(service_id)
    .bind(command)
    .execute(pool)
    .await
    .context("failed to update service command")?
    .rows_affected();

    if rows_affected == 0 {
        output(Response {
            success: false,
            message: Some(format!("no service with id {service_id}")),
            jobs: None,
            services: None,
        });
        return Ok(());
    }

    output(Response {
        success: true,
        message: Some(format!("issued {command} to service {service_id}")),
        jobs: None,
        services: None,
    });
    Ok(())
}

async fn cmd_jobs(pool: &PgPool, status: Option<&str>, limit: i64) -> Result<()> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, JobRow>(
                "SELECT id, job_type, status::text AS status, priority, created_at FROM jobs WHERE status = $1::job_status ORDER BY created_at DESC LIMIT $2",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, JobRow>(
                "SELECT id, job_type, status::text AS status, priority, created_at FROM jobs ORDER BY created_at DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to list jobs")?;

    output(Response {
        success: true,
        message: None,
        jobs: Some(rows),
        services: None,
    });
    Ok(())
}

async fn cmd_services(pool: &PgPool) -> Result<()> {
    let rows = sqlx::query_as::<_, ServiceRow>(
        "SELECT id, service_type, status::text AS status, command::text AS command FROM services ORDER BY service_type",
    )
    .fetch_all(pool)
    .await
    .context("failed to list services")?;

    output(Response {
        success: true,
        message: None,
        jobs: None,
        services: Some(rows),
    });
    Ok(())
}
