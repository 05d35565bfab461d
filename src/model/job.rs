use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Status of a job row. Transitions only along `Open -> Running -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Open,
    Running,
    Completed,
    Failed,
}

/// A unit of finite work with a `job_type` tag and JSON parameters.
///
/// Mirrors exactly the columns named in the spec's data model; see `jobs::worker::ChildJobSpec`
/// for how new rows of this shape get created by a running job.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    #[builder(default)]
    pub status: JobStatus,
    pub parameters: serde_json::Value,
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default)]
    pub parent_job_id: Option<Uuid>,
    #[builder(default_code = "Utc::now()")]
    pub created_at: DateTime<Utc>,
    #[builder(default_code = "Utc::now()")]
    pub updated_at: DateTime<Utc>,
    #[builder(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub error: Option<String>,
}

impl Job {
    /// Construct a new, unsaved child or root job in `Open` status.
    pub fn new_open(
        job_type: impl Into<String>,
        parameters: serde_json::Value,
        priority: i32,
        parent_job_id: Option<Uuid>,
    ) -> Self {
        Self::builder()
            .id(Uuid::new_v4())
            .job_type(job_type.into())
            .parameters(parameters)
            .priority(priority)
            .parent_job_id(parent_job_id)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_open_defaults_to_open_status() {
        let job = Job::new_open("scan_directory", serde_json::json!({}), 0, None);
        assert_eq!(job.status, JobStatus::Open);
        assert_eq!(job.retry_count, 0);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn child_job_carries_parent_id() {
        let parent_id = Uuid::new_v4();
        let child = Job::new_open("probe_file", serde_json::json!({}), 5, Some(parent_id));
        assert_eq!(child.parent_job_id, Some(parent_id));
        assert_eq!(child.priority, 5);
    }

    #[test]
    fn job_status_default_is_open() {
        assert_eq!(JobStatus::default(), JobStatus::Open);
    }
}
