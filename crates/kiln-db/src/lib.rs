//! Storage layer for the Kiln build server.
//!
//! Build records live behind the [`BuildRepo`] trait. [`MemoryBuildRepo`] keeps
//! them in process; [`PgBuildRepo`] stores them in PostgreSQL.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Maximum pooled connections.
const MAX_CONNECTIONS: u32 = 5;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the `builds` schema migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Connect, migrate and return a ready PostgreSQL build repository.
pub async fn connect_postgres(database_url: &str) -> DbResult<PgBuildRepo> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    info!("Database migrations applied");
    Ok(PgBuildRepo::new(pool))
}
