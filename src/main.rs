use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use warp::Filter;
use taskproc::{
  config::Config,
  database::setup_database,
  routes::{handle_rejection, routes},
  store::PgTaskStore,
  TaskRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
  taskproc::init_tracing();
  let config = Config::from_env()?;
  let db_pool = setup_database(config.require_database_url()?).await?;

  let repo = TaskRepository::new(Arc::new(PgTaskStore::new(db_pool)))
    .with_call_timeout(config.store_timeout);

  let api = routes(repo)
    .or(warp::path("health").map(|| "ok"))
    .recover(handle_rejection)
    .with(warp::trace::request());

  info!("API listening on port {}", config.server_port);
  warp::serve(api)
    .run(([0, 0, 0, 0], config.server_port))
    .await;
  Ok(())
}
