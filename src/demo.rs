//! Console walk-through of the repository: create, list, claim, complete, count.
//!
//! Runs against PostgreSQL when `DATABASE_URL` is set, otherwise against the
//! in-memory store.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info};
use taskproc::{
  config::Config,
  database::setup_database,
  store::{InMemoryTaskStore, PgTaskStore, TaskStore},
  worker_processing::processed_by,
  Task, TaskRepository,
};

const DEMO_WORKER: &str = "worker-test";

#[tokio::main]
async fn main() -> Result<()> {
  taskproc::init_tracing();
  let config = Config::from_env()?;

  let store: Arc<dyn TaskStore> = match &config.database_url {
    Some(url) => Arc::new(PgTaskStore::new(setup_database(url).await?)),
    None => {
      info!("DATABASE_URL not set, using the in-memory store");
      Arc::new(InMemoryTaskStore::new())
    }
  };
  let repo = TaskRepository::new(store).with_call_timeout(config.store_timeout);

  println!("\nCreating tasks...");
  let drafts = [
    Task::new("Send welcome email", json!({"email": "user@example.com", "subject": "Welcome"}).to_string()),
    Task::new("Process image", json!({"image_url": "https://example.com/image.jpg", "format": "thumbnail"}).to_string()),
    Task::new("Generate report", json!({"report_type": "monthly", "user_id": 12345}).to_string()),
  ];
  for draft in drafts {
    match repo.create(draft).await {
      Ok(task) => println!("  created: {} (id: {})", task.title, task.id),
      Err(e) => error!("Failed to create task: {}", e),
    }
  }

  println!("\nPending tasks:");
  match repo.find_pending(10).await {
    Ok(pending) => {
      println!("  found {} task(s)", pending.len());
      for (i, task) in pending.iter().enumerate() {
        println!("  {}. {} (attempts: {})", i + 1, task.title, task.attempts);
      }
    }
    Err(e) => error!("Failed to list pending tasks: {}", e),
  }

  println!("\nClaiming a task as '{}'...", DEMO_WORKER);
  match repo.claim(DEMO_WORKER).await {
    Ok(Some(task)) => {
      println!("  claimed: {}", task.title);
      println!("  worker: {}", task.claimed_by.as_deref().unwrap_or_default());
      println!("  attempts: {}", task.attempts);

      println!("\nMarking task as processed...");
      match repo.mark_processed(task.id, processed_by(DEMO_WORKER)).await {
        Ok(()) => println!("  done"),
        Err(e) => error!("Failed to mark task processed: {}", e),
      }
    }
    Ok(None) => println!("  no tasks available to claim"),
    Err(e) => error!("Claim failed: {}", e),
  }

  println!("\nStatistics:");
  match repo.stats().await {
    Ok(stats) => println!(
      "  total: {} | pending: {} | in flight: {} | processed: {}",
      stats.total, stats.pending, stats.in_flight, stats.processed
    ),
    Err(e) => error!("Failed to read stats: {}", e),
  }

  println!("\nAll tasks:");
  match repo.find_all(0).await {
    Ok(tasks) => {
      for (i, task) in tasks.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, task.status().label(), task.title);
      }
    }
    Err(e) => error!("Failed to list tasks: {}", e),
  }

  println!("\nDemo complete.");
  Ok(())
}
