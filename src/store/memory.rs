//! In-process task store.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SortOrder, TaskFilter, TaskStore, TaskUpdate};
use crate::error::TaskError;
use crate::models::Task;

/// Tasks kept in insertion order behind a single async mutex.
///
/// `find_one_and_update` selects and mutates under one lock acquisition,
/// which gives it the same atomicity the database store gets from row locks.
#[derive(Default)]
pub struct InMemoryTaskStore {
  tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskStore {
  pub fn new() -> Self {
    Self::default()
  }
}

/// Index of the first match under `sort`. Ties keep insertion order.
fn select(tasks: &[Task], filter: TaskFilter, sort: SortOrder) -> Option<usize> {
  let matches = tasks
    .iter()
    .enumerate()
    .filter(|(_, task)| filter.matches(task));
  match sort {
    SortOrder::CreatedAtAsc => matches.min_by_key(|(_, task)| task.created_at),
    SortOrder::CreatedAtDesc => matches
      .rev()
      .max_by_key(|(_, task)| task.created_at),
  }
  .map(|(idx, _)| idx)
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
  async fn insert(&self, task: &Task) -> Result<(), TaskError> {
    let mut tasks = self.tasks.lock().await;
    if tasks.iter().any(|existing| existing.id == task.id) {
      return Err(TaskError::Persistence(format!("duplicate task id {}", task.id)));
    }
    tasks.push(task.clone());
    Ok(())
  }

  async fn find_many(
    &self,
    filter: TaskFilter,
    sort: SortOrder,
    limit: Option<u64>,
  ) -> Result<Vec<Task>, TaskError> {
    let tasks = self.tasks.lock().await;
    let mut found: Vec<Task> = tasks
      .iter()
      .filter(|task| filter.matches(task))
      .cloned()
      .collect();
    drop(tasks);

    match sort {
      SortOrder::CreatedAtAsc => found.sort_by_key(|task| task.created_at),
      SortOrder::CreatedAtDesc => found.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
    if let Some(limit) = limit {
      found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    Ok(found)
  }

  async fn find_one_and_update(
    &self,
    filter: TaskFilter,
    update: &TaskUpdate,
    sort: SortOrder,
  ) -> Result<Option<Task>, TaskError> {
    let mut tasks = self.tasks.lock().await;
    let Some(idx) = select(&tasks, filter, sort) else {
      return Ok(None);
    };
    let task = &mut tasks[idx];
    update.apply(task);
    Ok(Some(task.clone()))
  }

  async fn update_one(&self, filter: TaskFilter, update: &TaskUpdate) -> Result<u64, TaskError> {
    let mut tasks = self.tasks.lock().await;
    match tasks.iter_mut().find(|task| filter.matches(task)) {
      Some(task) => {
        update.apply(task);
        Ok(1)
      }
      None => Ok(0),
    }
  }

  async fn count(&self, filter: TaskFilter) -> Result<u64, TaskError> {
    let tasks = self.tasks.lock().await;
    Ok(tasks.iter().filter(|task| filter.matches(task)).count() as u64)
  }
}
