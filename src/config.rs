//! Process configuration, loaded once at startup from the environment.

use anyhow::{Context, Result};
use std::env;

/// Tuning knobs and connection info for the orchestrator process.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub max_concurrent_jobs: usize,
    pub job_poll_interval_secs: u64,
    pub max_concurrent_services: usize,
    pub heartbeat_interval_secs: u64,
}

impl OrchestratorConfig {
    /// Load configuration from the environment, falling back to a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        // Ignored if no .env file exists; real deployments set these via the environment directly.
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            database_url,
            max_concurrent_jobs: parse_env_or("MAX_CONCURRENT_JOBS", 5),
            job_poll_interval_secs: parse_env_or("JOB_POLL_INTERVAL_SECS", 2),
            max_concurrent_services: parse_env_or("MAX_CONCURRENT_SERVICES", 10),
            heartbeat_interval_secs: parse_env_or("HEARTBEAT_INTERVAL_SECS", 30),
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn parse_env_or_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("SOME_UNSET_KNOB");
        assert_eq!(parse_env_or::<u64>("SOME_UNSET_KNOB", 42), 42);
    }

    #[test]
    fn parse_env_or_uses_set_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("SOME_SET_KNOB", "7");
        assert_eq!(parse_env_or::<u64>("SOME_SET_KNOB", 42), 7);
        env::remove_var("SOME_SET_KNOB");
    }

    #[test]
    fn parse_env_or_falls_back_on_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("SOME_GARBAGE_KNOB", "not-a-number");
        assert_eq!(parse_env_or::<u64>("SOME_GARBAGE_KNOB", 9), 9);
        env::remove_var("SOME_GARBAGE_KNOB");
    }
}
