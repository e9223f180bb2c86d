//! Build record operations on top of a storage adapter.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use kiln_core::{BuildId, BuildOutcome, BuildRecord, BuildStatus, Error, Result, TriggerPayload};
use kiln_db::BuildRepo;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Failed build count for one commit author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameEntry {
    pub author: String,
    pub failures: usize,
}

/// Creates, loads and updates build records.
pub struct BuildRecords {
    repo: Arc<dyn BuildRepo>,
}

impl BuildRecords {
    pub fn new(repo: Arc<dyn BuildRepo>) -> Self {
        Self { repo }
    }

    /// Validate `payload` and persist a new processing record.
    ///
    /// Nothing is written when validation fails.
    pub async fn create(&self, payload: TriggerPayload) -> Result<BuildRecord> {
        let new = payload.validate()?;
        let record = self.repo.insert(new).await?;
        info!(
            build_id = %record.id,
            repo = %record.repository.name,
            git_ref = %record.r#ref,
            "Created build"
        );
        Ok(record)
    }

    /// Look up a record by its textual id.
    pub async fn load_by_id(&self, id: &str) -> Result<BuildRecord> {
        let id: BuildId = id.parse()?;
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("build {}", id)))
    }

    /// Typed lookup. A missing record is reported as [`Error::BuildNotFound`].
    pub async fn load(&self, id: BuildId) -> Result<BuildRecord> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(Error::BuildNotFound(id))
    }

    /// Cheap round trip to storage: a point lookup of an id that was never issued.
    pub async fn check_storage(&self) -> Result<()> {
        self.repo.find_by_id(BuildId::new()).await?;
        Ok(())
    }

    /// Record the outcome of the current attempt and persist it.
    ///
    /// `record` is updated in place even if the write fails.
    pub async fn mark_result(&self, record: &mut BuildRecord, outcome: &BuildOutcome) -> Result<()> {
        record.finish(outcome, Utc::now())?;
        self.repo.update(record).await?;
        Ok(())
    }

    /// Reset `record` to processing for another attempt and persist it.
    pub async fn begin_attempt(&self, record: &mut BuildRecord) -> Result<()> {
        record.begin_attempt();
        self.repo.update(record).await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<BuildRecord>> {
        Ok(self.repo.find_all().await?)
    }

    /// Failed builds per author, most failures first.
    pub async fn blame(&self) -> Result<Vec<BlameEntry>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in self.repo.find_all().await? {
            if record.status == BuildStatus::Failed {
                *counts.entry(record.author.name).or_default() += 1;
            }
        }

        let mut entries: Vec<BlameEntry> = counts
            .into_iter()
            .map(|(author, failures)| BlameEntry { author, failures })
            .collect();
        entries.sort_by(|a, b| b.failures.cmp(&a.failures).then_with(|| a.author.cmp(&b.author)));
        Ok(entries)
    }
}
