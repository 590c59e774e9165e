//! Database connection setup.

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use rowguard_observability::mask_dsn;

/// Connect a pool. Any error message carries the masked connection string,
/// never the raw one.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .with_context(|| format!("failed to connect to {}", mask_dsn(database_url)))
}
