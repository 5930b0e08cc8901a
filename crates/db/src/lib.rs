//! Record Store Adapter for the roster.
//!
//! - [`models`]: row types and DTOs for `members`, `battle_events`,
//!   `battle_entries`.
//! - [`repositories`]: per-table SQL over a [`DbPool`].
//! - [`RecordStore`] / [`ChangeFeed`]: the typed seam the engine talks to,
//!   implemented by [`PgStore`] / [`PgChangeFeed`] and by the in-process
//!   [`MemoryStore`].

use sqlx::postgres::PgPoolOptions;

pub mod change;
pub mod error;
pub mod feed;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use change::{ChangeFeed, ChangeOp, FeedMessage, RowChange, RowFilter, Table};
pub use error::StoreError;
pub use feed::PgChangeFeed;
pub use memory::MemoryStore;
pub use store::{PgStore, RecordStore, WriteGuard};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool is usable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
