//! Persistence boundary for task documents.
//!
//! The repository only talks to storage through [`TaskStore`]. Every
//! implementation must apply `find_one_and_update` as one indivisible step:
//! the selection, the mutation and the read-back of the updated document
//! happen together, so two racing callers can never both match the same task.

mod memory;
mod postgres;

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TaskError;
use crate::models::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
  All,
  /// Not processed and not held by any worker.
  Pending,
  InFlight,
  Processed,
  ById(TaskId),
  /// The given task, only while a worker holds it and it is not processed.
  InFlightById(TaskId),
}

impl TaskFilter {
  pub fn matches(&self, task: &Task) -> bool {
    match self {
      TaskFilter::All => true,
      TaskFilter::Pending => !task.processed && task.claimed_by.is_none(),
      TaskFilter::InFlight => !task.processed && task.claimed_by.is_some(),
      TaskFilter::Processed => task.processed,
      TaskFilter::ById(id) => task.id == *id,
      TaskFilter::InFlightById(id) => task.id == *id && TaskFilter::InFlight.matches(task),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
  /// Set `claimed_by`/`claimed_at` and bump `attempts` by one.
  Claim { worker_id: String, at: DateTime<Utc> },
  /// Set `processed`, `processed_at` and `result`.
  Complete { result: String, at: DateTime<Utc> },
}

impl TaskUpdate {
  pub fn apply(&self, task: &mut Task) {
    match self {
      TaskUpdate::Claim { worker_id, at } => {
        task.claimed_by = Some(worker_id.clone());
        task.claimed_at = Some(*at);
        task.attempts += 1;
      }
      TaskUpdate::Complete { result, at } => {
        task.processed = true;
        task.processed_at = Some(*at);
        task.result = Some(result.clone());
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
  CreatedAtAsc,
  CreatedAtDesc,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
  async fn insert(&self, task: &Task) -> Result<(), TaskError>;

  /// `limit: None` returns every match.
  async fn find_many(
    &self,
    filter: TaskFilter,
    sort: SortOrder,
    limit: Option<u64>,
  ) -> Result<Vec<Task>, TaskError>;

  /// Atomically select the first match under `sort`, apply `update` and
  /// return the document as it is after the update.
  async fn find_one_and_update(
    &self,
    filter: TaskFilter,
    update: &TaskUpdate,
    sort: SortOrder,
  ) -> Result<Option<Task>, TaskError>;

  /// Update at most one matching document; returns the matched count.
  async fn update_one(&self, filter: TaskFilter, update: &TaskUpdate) -> Result<u64, TaskError>;

  async fn count(&self, filter: TaskFilter) -> Result<u64, TaskError>;
}
