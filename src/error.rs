//! Error kinds the Contexts and Engines branch on.
//!
//! Everything else — I/O failures, serialization failures, arbitrary Worker/ServiceImpl
//! failures — is carried as an opaque `anyhow::Error` and stringified into the `error`
//! column. These variants exist only where the caller needs to pattern-match on *why*
//! a claim failed.

use uuid::Uuid;

/// Errors raised by `JobContext`/`ServiceContext` during `open`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No row exists with the given id.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// The row exists but is not in a claimable state (lost the race, or already running).
    #[error("{kind} {id} is not claimable (status={status})")]
    IllegalState {
        kind: &'static str,
        id: Uuid,
        status: String,
    },

    /// No Worker/ServiceImpl factory is registered for this type tag.
    #[error("no factory registered for {kind} type {type_tag:?}")]
    UnknownType { kind: &'static str, type_tag: String },
}
