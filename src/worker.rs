use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use taskproc::{
  config::Config,
  database::setup_database,
  store::PgTaskStore,
  worker_loop::WorkerGroup,
  worker_processing::SimulatedProcessor,
  TaskRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
  taskproc::init_tracing();
  let config = Config::from_env()?;
  let db_pool = setup_database(config.require_database_url()?).await?;

  let repo = TaskRepository::new(Arc::new(PgTaskStore::new(db_pool)))
    .with_call_timeout(config.store_timeout);

  let group = WorkerGroup::spawn(
    config.worker_concurrency,
    &config.worker_id,
    repo,
    Arc::new(SimulatedProcessor::default()),
    config.poll_interval,
  );
  info!(
    "Worker {} running with {} loop(s)",
    config.worker_id, config.worker_concurrency
  );

  tokio::signal::ctrl_c()
    .await
    .context("Failed to listen for shutdown signal")?;
  info!("Shutdown requested, waiting for in-flight tasks");

  for report in group.shutdown_and_join().await {
    info!(
      "{}: claimed {} | completed {} | failed {}",
      report.worker_id, report.claimed, report.completed, report.failed
    );
  }
  Ok(())
}
