use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Postgres handle shared by the request path and the ingestion workers.
/// `pool_max_size` should cover concurrent queries plus the ingestion
/// worker count; acquire timeout doubles as the database call bound.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect, probe the server, and bring the schema up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect(&config.url)
            .await
            .context("connecting to postgres")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("postgres did not answer the connection probe")?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .context("applying migrations")?;

        info!(
            max_connections = config.pool_max_size,
            "database pool ready"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
