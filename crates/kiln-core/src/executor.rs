//! Executor trait and build outcomes.
//!
//! Executors run a build (hooks, test command, ...) and report whether it passed.
//! A failing build is not an error of the server: it is a normal outcome that
//! carries the message to record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::BuildRecord;

/// Result of executing a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum BuildOutcome {
    Success,
    Failure(String),
}

impl BuildOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        BuildOutcome::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success)
    }
}

/// Trait for build executors.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run the build described by `record` to completion.
    async fn execute(&self, record: &BuildRecord) -> BuildOutcome;
}

/// Executor that reports success without running anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl BuildExecutor for NoopExecutor {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn execute(&self, _record: &BuildRecord) -> BuildOutcome {
        BuildOutcome::Success
    }
}
