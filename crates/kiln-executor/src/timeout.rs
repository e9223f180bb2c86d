//! Bounded execution time for any executor.

use async_trait::async_trait;
use kiln_core::executor::{BuildExecutor, BuildOutcome};
use kiln_core::BuildRecord;
use std::time::Duration;
use tracing::warn;

/// Wraps an executor and fails builds that run longer than `limit`.
///
/// The inner future is dropped on expiry, so executors that own child
/// processes should spawn them with `kill_on_drop`.
pub struct TimeLimited<E> {
    inner: E,
    limit: Option<Duration>,
}

impl<E: BuildExecutor> TimeLimited<E> {
    /// `None` disables the limit.
    pub fn new(inner: E, limit: Option<Duration>) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }
}

#[async_trait]
impl<E: BuildExecutor> BuildExecutor for TimeLimited<E> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn execute(&self, record: &BuildRecord) -> BuildOutcome {
        let Some(limit) = self.limit else {
            return self.inner.execute(record).await;
        };

        match tokio::time::timeout(limit, self.inner.execute(record)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(build_id = %record.id, limit_secs = limit.as_secs(), "Build timed out");
                BuildOutcome::Failure(format!("build timed out after {}s", limit.as_secs()))
            }
        }
    }
}
