//! Error types for Kiln.

use thiserror::Error;

use crate::BuildId;

#[derive(Debug, Error)]
pub enum Error {
    /// The trigger payload is incomplete or malformed. Nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid build id: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A queued build disappeared from storage before the worker reached it.
    #[error("build {0} vanished before it could run")]
    BuildNotFound(BuildId),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
