use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        // Fail at startup, not on the first upsert, when the schema is missing.
        sqlx::query("SELECT 1 FROM properties LIMIT 1")
            .execute(&pool)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "properties table not reachable (run migrations/0001_create_properties.sql): {}",
                    e
                )
            })?;

        tracing::info!("Database pool ready");
        Ok(Self { pool })
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
