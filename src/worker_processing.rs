use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::models::Task;

/// Turns a claimed task into the result string recorded on completion.
/// The payload belongs to the caller; processors decode it however they like.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
  async fn process(&self, task: &Task, worker_id: &str) -> Result<String>;
}

/// Pretends to work for `delay`, then reports which worker handled the task.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
  pub delay: Duration,
}

impl SimulatedProcessor {
  pub fn new(delay: Duration) -> Self {
    Self { delay }
  }
}

impl Default for SimulatedProcessor {
  fn default() -> Self {
    Self::new(Duration::from_millis(250))
  }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
  async fn process(&self, task: &Task, worker_id: &str) -> Result<String> {
    info!("Worker {}: Processing task {} ({})", worker_id, task.id, task.title);
    sleep(self.delay).await;
    Ok(processed_by(worker_id))
  }
}

pub fn processed_by(worker_id: &str) -> String {
  format!("processed successfully by {}", worker_id)
}
