use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Status of a service row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "service_status", rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Inactive,
    Active,
    Failed,
    ShuttingDown,
}

/// Operator-issued intent on a service row. Cleared back to `None` once the engine acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "service_command", rename_all = "snake_case")]
pub enum ServiceCommand {
    #[default]
    None,
    Start,
    Stop,
    Restart,
}

/// A persisted long-running activity with a `service_type` tag, parameters, and an
/// operator-controlled command.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Service {
    pub id: Uuid,
    pub service_type: String,
    #[builder(default)]
    pub status: ServiceStatus,
    #[builder(default)]
    pub command: ServiceCommand,
    #[builder(default)]
    pub command_issued_at: Option<DateTime<Utc>>,
    pub parameters: serde_json::Value,
    #[builder(default_code = "Utc::now()")]
    pub created_at: DateTime<Utc>,
    #[builder(default_code = "Utc::now()")]
    pub updated_at: DateTime<Utc>,
    #[builder(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub error: Option<String>,
}

impl Service {
    /// Construct a new, unsaved service row in `Inactive`/`None` status — the shape used
    /// by boot-time seeding.
    pub fn new_seed(service_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self::builder()
            .id(Uuid::new_v4())
            .service_type(service_type.into())
            .parameters(parameters)
            .build()
    }

    /// True iff an operator START command on this row should be picked up by the start pass.
    pub fn is_runnable(&self) -> bool {
        matches!(self.status, ServiceStatus::Inactive | ServiceStatus::Failed)
            && self.command == ServiceCommand::Start
    }

    /// True iff an operator STOP command on this row should be picked up by the stop pass.
    pub fn is_stoppable(&self) -> bool {
        self.status == ServiceStatus::Active && self.command == ServiceCommand::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_seed_defaults_to_inactive_and_no_command() {
        let svc = Service::new_seed("watchdog", serde_json::json!({}));
        assert_eq!(svc.status, ServiceStatus::Inactive);
        assert_eq!(svc.command, ServiceCommand::None);
        assert!(svc.last_heartbeat_at.is_none());
    }

    #[test]
    fn is_runnable_requires_inactive_or_failed_plus_start() {
        let mut svc = Service::new_seed("watchdog", serde_json::json!({}));
        assert!(!svc.is_runnable());
        svc.command = ServiceCommand::Start;
        assert!(svc.is_runnable());
        svc.status = ServiceStatus::Active;
        assert!(!svc.is_runnable());
        svc.status = ServiceStatus::Failed;
        assert!(svc.is_runnable());
    }

    #[test]
    fn is_stoppable_requires_active_plus_stop() {
        let mut svc = Service::new_seed("watchdog", serde_json::json!({}));
        svc.status = ServiceStatus::Active;
        assert!(!svc.is_stoppable());
        svc.command = ServiceCommand::Stop;
        assert!(svc.is_stoppable());
    }
}
