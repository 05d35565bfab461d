//! The Service Engine: ServiceContext, ServiceEngine, and the ServiceImpl contract/registry.

mod context;
mod engine;
mod service_impl;

pub use context::ServiceContext;
pub use engine::{ServiceEngine, ServiceEngineConfig};
pub use service_impl::{ServiceImpl, ServiceRegistry};
