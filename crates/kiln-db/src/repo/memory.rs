//! In-memory build repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::{BuildId, BuildRecord, NewBuild};
use tokio::sync::RwLock;

use crate::{BuildRepo, DbError, DbResult};

/// Build storage held in process memory. Not durable; used for local runs and tests.
#[derive(Default)]
pub struct MemoryBuildRepo {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<BuildId, BuildRecord>,
    order: Vec<BuildId>,
}

impl MemoryBuildRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildRepo for MemoryBuildRepo {
    async fn insert(&self, build: NewBuild) -> DbResult<BuildRecord> {
        let record = BuildRecord::from_new(BuildId::new(), build, Utc::now());
        let mut inner = self.inner.write().await;
        inner.order.push(record.id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: BuildId) -> DbResult<Option<BuildRecord>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn find_all(&self) -> DbResult<Vec<BuildRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }

    async fn update(&self, record: &BuildRecord) -> DbResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .records
            .get_mut(&record.id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", record.id)))?;
        stored.status = record.status;
        stored.error = record.error.clone();
        stored.build_time = record.build_time;
        Ok(())
    }
}
