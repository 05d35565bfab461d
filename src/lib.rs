//! orchestrator_core: a persistent job-and-service orchestrator for the media-indexing
//! pipeline. See `SPEC_FULL.md` for the full design.

pub mod config;
pub mod error;
pub mod jobs;
pub mod kernel;
pub mod model;
pub mod services;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use kernel::OrchestratorKernel;
