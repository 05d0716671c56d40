//! Database layer for Offload.
//!
//! Provides the `JobRepo` trait with PostgreSQL and in-memory
//! implementations. The conditional status transition is the sole
//! concurrency-control primitive; both implementations enforce the
//! forward-only state machine at the storage boundary.

pub mod error;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::memory::MemoryJobRepo;
pub use repo::pg::PgJobRepo;
pub use repo::{JobRepo, OutboxEntry, TransitionFields};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
