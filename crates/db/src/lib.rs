//! Persistence collaborator for the training-flow engines.
//!
//! Implements the storage contracts from `ramp_core::store` against
//! PostgreSQL: row models in [`models`], sqlx repositories in
//! [`repositories`]. Tree-shaped reads return fully-materialized graphs;
//! tree-shaped writes and the active-version swap each run in a single
//! transaction.

pub mod models;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Embedded migrations, applied with `MIGRATOR.run(&pool)`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Create a connection pool from the `DATABASE_URL` environment variable,
/// honouring a `.env` file when present.
pub async fn connect_from_env() -> Result<DbPool, sqlx::Error> {
    dotenvy::dotenv().ok();
    let url = dotenvy::var("DATABASE_URL")
        .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
    create_pool(&url).await
}

/// Cheap liveness probe for readiness checks.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
