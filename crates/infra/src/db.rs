//! Postgres connection pool.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Bound on waiting for a free connection; record and run store calls fail
/// with a retryable storage error past it.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to Postgres and verify the connection.
///
/// The pool is cheap to clone; hand one clone to each store.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    info!(max_connections, "connected to postgres");
    Ok(pool)
}
