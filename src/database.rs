use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!();

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;
static MAX_CONNECTIONS: u32 = 10;

/// Connect to PostgreSQL (retrying with exponential backoff) and bring the
/// schema up to date. The caller owns the returned pool.
pub async fn setup_database(database_url: &str) -> Result<PgPool> {
  let pool = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    PgPoolOptions::new()
      .max_connections(MAX_CONNECTIONS)
      .connect(database_url)
  })
    .await
    .context("Failed to connect to database")?;

  MIGRATOR.run(&pool)
    .await
    .context("Failed to run database migrations")?;
  info!("Database migrations complete");
  Ok(pool)
}
