//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::build::{Person, RepositoryInfo};
use kiln_core::{BuildId, BuildRecord, BuildStatus, NewBuild};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Durable storage for build records.
///
/// Ids are assigned here, on insert. Malformed ids never reach a repository:
/// they are rejected when parsed into a [`BuildId`].
#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Persist a new build and return it with its assigned id.
    async fn insert(&self, build: NewBuild) -> DbResult<BuildRecord>;

    async fn find_by_id(&self, id: BuildId) -> DbResult<Option<BuildRecord>>;

    /// All builds in insertion order.
    async fn find_all(&self) -> DbResult<Vec<BuildRecord>>;

    /// Overwrite the mutable fields of an existing build.
    async fn update(&self, record: &BuildRecord) -> DbResult<()>;
}

/// A build row in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildRow {
    id: uuid::Uuid,
    repository: serde_json::Value,
    commit_url: String,
    author: serde_json::Value,
    message: String,
    committed_at: String,
    git_ref: String,
    status: String,
    error: String,
    build_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            DbError::Corrupt(format!("build {}: {}: {}", row.id, what, e))
        };

        let repository: RepositoryInfo = serde_json::from_value(row.repository.clone())
            .map_err(|e| corrupt("repository", &e))?;
        let author: Person =
            serde_json::from_value(row.author.clone()).map_err(|e| corrupt("author", &e))?;
        let status = row
            .status
            .parse::<BuildStatus>()
            .map_err(|e| corrupt("status", &e))?;

        Ok(BuildRecord {
            id: BuildId::from_uuid(row.id),
            repository,
            url: row.commit_url,
            author,
            message: row.message,
            timestamp: row.committed_at,
            r#ref: row.git_ref,
            status,
            error: row.error,
            build_time: row.build_time,
            created_at: row.created_at,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> DbResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| DbError::Corrupt(e.to_string()))
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn insert(&self, build: NewBuild) -> DbResult<BuildRecord> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, repository, commit_url, author, message, committed_at, git_ref, status, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'processing', '', NOW())
            RETURNING *
            "#,
        )
        .bind(BuildId::new().as_uuid())
        .bind(to_json(&build.repository)?)
        .bind(&build.url)
        .bind(to_json(&build.author)?)
        .bind(&build.message)
        .bind(&build.timestamp)
        .bind(&build.r#ref)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn find_by_id(&self, id: BuildId) -> DbResult<Option<BuildRecord>> {
        let row = sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(BuildRecord::try_from).transpose()
    }

    async fn find_all(&self) -> DbResult<Vec<BuildRecord>> {
        let rows = sqlx::query_as::<_, BuildRow>("SELECT * FROM builds ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(BuildRecord::try_from).collect()
    }

    async fn update(&self, record: &BuildRecord) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE builds SET status = $2, error = $3, build_time = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.build_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", record.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::BuildOutcome;

    fn new_build() -> NewBuild {
        NewBuild {
            repository: RepositoryInfo {
                url: "https://github.com/acme/widgets".to_string(),
                name: "widgets".to_string(),
                description: String::new(),
                owner: None,
            },
            url: "https://github.com/acme/widgets/commit/abc".to_string(),
            author: Person {
                name: "dev".to_string(),
                email: "dev@acme.test".to_string(),
            },
            message: "msg".to_string(),
            timestamp: "2024-01-02T03:04:05Z".to_string(),
            r#ref: "refs/heads/main".to_string(),
        }
    }

    #[test]
    fn test_row_with_unknown_status_is_corrupt() {
        let row = BuildRow {
            id: uuid::Uuid::now_v7(),
            repository: to_json(&new_build().repository).unwrap(),
            commit_url: "https://github.com/acme/widgets/commit/abc".to_string(),
            author: to_json(&new_build().author).unwrap(),
            message: "msg".to_string(),
            committed_at: "2024-01-02T03:04:05Z".to_string(),
            git_ref: "refs/heads/main".to_string(),
            status: "exploded".to_string(),
            error: String::new(),
            build_time: None,
            created_at: Utc::now(),
        };
        assert!(matches!(BuildRecord::try_from(row), Err(DbError::Corrupt(_))));
    }

    /// Requires a PostgreSQL database at `DATABASE_URL`.
    #[tokio::test]
    #[ignore]
    async fn test_postgres_round_trip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let repo = PgBuildRepo::new(pool);

        let mut record = repo.insert(new_build()).await.unwrap();
        assert_eq!(record.status, BuildStatus::Processing);

        record
            .finish(&BuildOutcome::failure("boom"), Utc::now())
            .unwrap();
        repo.update(&record).await.unwrap();

        let loaded = repo.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BuildStatus::Failed);
        assert_eq!(loaded.error, "boom");
    }
}
