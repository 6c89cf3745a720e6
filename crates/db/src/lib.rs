//! PostgreSQL persistence for the plangen task queue.
//!
//! Repositories are zero-sized structs whose async methods take `&PgPool`
//! (or an open transaction) as the first argument and return
//! `sqlx::Error` untouched; callers decide what is retryable via
//! [`transient::is_transient`].

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod transient;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
///
/// The worker needs at least two connections: the cancellation monitor
/// issues short statements while the claim/completion path may hold one.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(2))
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
///
/// sqlx records applied migrations in `_sqlx_migrations` and holds an
/// advisory lock while applying, so each worker may call this at start.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
