//! Failure notification trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BuildRecord, Result};

/// What happened to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Sent,
    /// Nothing was sent, e.g. because credentials are not configured.
    NotSent(String),
}

impl NotifyOutcome {
    pub fn not_sent(reason: impl Into<String>) -> Self {
        NotifyOutcome::NotSent(reason.into())
    }

    pub fn was_sent(&self) -> bool {
        matches!(self, NotifyOutcome::Sent)
    }
}

/// Trait for reporting failed builds to an external system.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Report a failed build.
    ///
    /// Missing credentials are not an error: implementations return
    /// [`NotifyOutcome::NotSent`] without touching the network.
    async fn notify(&self, record: &BuildRecord) -> Result<NotifyOutcome>;
}

/// Notifier that never sends anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn notify(&self, _record: &BuildRecord) -> Result<NotifyOutcome> {
        Ok(NotifyOutcome::not_sent("notifications disabled"))
    }
}
