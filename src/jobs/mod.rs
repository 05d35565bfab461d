//! The Job Engine: JobContext, JobEngine, and the Worker contract/registry.

mod context;
mod engine;
mod worker;

pub use context::JobContext;
pub use engine::{JobEngine, JobEngineConfig};
pub use worker::{ChildJobSpec, Worker, WorkerRegistry};
