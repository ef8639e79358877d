//! # Error Types
//!
//! Failures callers are expected to match on. Everything else travels as `anyhow::Error`.

use crate::domain::types::SessionId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The queue stayed full for the whole admission window. Nothing was queued.
    #[error("Command queue is full")]
    AdmissionRejected,

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Executable was never admitted to the queue")]
    NotSubmitted,

    #[error("Timed out waiting for completion")]
    WaitTimeout,

    #[error("Executor worker has stopped")]
    WorkerStopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0} is already taking part in a session of this kind")]
    AlreadyActive(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),
}
