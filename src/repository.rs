//! Task repository: the only reader and mutator of task documents.
//!
//! The repository keeps no state of its own besides the injected store and
//! the per-call deadline, so it can be cloned into as many workers or request
//! handlers as needed. Claim correctness rests entirely on the store's atomic
//! `find_one_and_update`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::models::{Task, TaskId, TaskStats};
use crate::store::{SortOrder, TaskFilter, TaskStore, TaskUpdate};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TaskRepository {
  store: Arc<dyn TaskStore>,
  call_timeout: Duration,
}

fn limit_of(limit: u64) -> Option<u64> {
  (limit > 0).then_some(limit)
}

impl TaskRepository {
  pub fn new(store: Arc<dyn TaskStore>) -> Self {
    Self {
      store,
      call_timeout: DEFAULT_CALL_TIMEOUT,
    }
  }

  pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
    self.call_timeout = call_timeout;
    self
  }

  pub fn call_timeout(&self) -> Duration {
    self.call_timeout
  }

  async fn bounded<T>(
    &self,
    operation: &'static str,
    call: impl Future<Output = Result<T, TaskError>>,
  ) -> Result<T, TaskError> {
    match tokio::time::timeout(self.call_timeout, call).await {
      Ok(outcome) => outcome,
      Err(_) => {
        warn!(operation, timeout_ms = self.call_timeout.as_millis() as u64, "store call exceeded its deadline");
        Err(TaskError::Timeout {
          operation,
          after: self.call_timeout,
        })
      }
    }
  }

  /// Persist a new task, assigning `id` and `created_at` when unset.
  /// Title is not validated here.
  pub async fn create(&self, mut task: Task) -> Result<Task, TaskError> {
    if !task.has_id() {
      task.id = Uuid::new_v4();
    }
    if !task.has_created_at() {
      task.created_at = Utc::now();
    }
    self.bounded("create", self.store.insert(&task)).await?;
    debug!(task_id = %task.id, title = %task.title, "task created");
    Ok(task)
  }

  pub async fn get_by_id(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
    let found = self
      .bounded("get_by_id", self.store.find_many(TaskFilter::ById(id), SortOrder::CreatedAtAsc, Some(1)))
      .await?;
    Ok(found.into_iter().next())
  }

  /// Newest first. `limit == 0` means no limit.
  pub async fn find_all(&self, limit: u64) -> Result<Vec<Task>, TaskError> {
    self
      .bounded("find_all", self.store.find_many(TaskFilter::All, SortOrder::CreatedAtDesc, limit_of(limit)))
      .await
  }

  /// Unclaimed, unprocessed tasks, oldest first. `limit == 0` means no limit.
  pub async fn find_pending(&self, limit: u64) -> Result<Vec<Task>, TaskError> {
    self
      .bounded("find_pending", self.store.find_many(TaskFilter::Pending, SortOrder::CreatedAtAsc, limit_of(limit)))
      .await
  }

  /// Claim the oldest pending task for `worker_id`.
  ///
  /// `Ok(None)` means nothing is pending. On [`TaskError::Timeout`] the claim
  /// may still have been committed; the caller cannot tell either way.
  #[tracing::instrument(skip(self))]
  pub async fn claim(&self, worker_id: &str) -> Result<Option<Task>, TaskError> {
    let update = TaskUpdate::Claim {
      worker_id: worker_id.to_owned(),
      at: Utc::now(),
    };
    let claimed = self
      .bounded("claim", self.store.find_one_and_update(TaskFilter::Pending, &update, SortOrder::CreatedAtAsc))
      .await?;
    match &claimed {
      Some(task) => info!(task_id = %task.id, attempts = task.attempts, "task claimed"),
      None => debug!("no pending task"),
    }
    Ok(claimed)
  }

  /// Record the outcome of an in-flight task. Any caller may complete any
  /// claimed task; there is no check against the claiming worker.
  ///
  /// A pending or already processed task is left untouched and reported as
  /// [`TaskError::InvalidTransition`].
  pub async fn mark_processed(&self, id: TaskId, result: impl Into<String>) -> Result<(), TaskError> {
    let update = TaskUpdate::Complete {
      result: result.into(),
      at: Utc::now(),
    };
    let matched = self
      .bounded("mark_processed", self.store.update_one(TaskFilter::InFlightById(id), &update))
      .await?;
    if matched == 0 {
      return match self.get_by_id(id).await? {
        None => Err(TaskError::UnknownTask(id)),
        Some(task) => {
          warn!(task_id = %id, status = task.status().label(), "completion refused, task is not in flight");
          Err(TaskError::InvalidTransition(id))
        }
      };
    }
    info!(task_id = %id, "task processed");
    Ok(())
  }

  pub async fn count_all(&self) -> Result<u64, TaskError> {
    self.bounded("count_all", self.store.count(TaskFilter::All)).await
  }

  pub async fn count_pending(&self) -> Result<u64, TaskError> {
    self.bounded("count_pending", self.store.count(TaskFilter::Pending)).await
  }

  pub async fn stats(&self) -> Result<TaskStats, TaskError> {
    Ok(TaskStats {
      total: self.count_all().await?,
      pending: self.count_pending().await?,
      in_flight: self.bounded("count_in_flight", self.store.count(TaskFilter::InFlight)).await?,
      processed: self.bounded("count_processed", self.store.count(TaskFilter::Processed)).await?,
    })
  }
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use chrono::{TimeZone, Utc};
  use tokio_test::{assert_err, assert_ok};

  use super::*;
  use crate::models::TaskStatus;
  use crate::store::InMemoryTaskStore;

  fn repo() -> TaskRepository {
    TaskRepository::new(Arc::new(InMemoryTaskStore::new()))
  }

  /// Store whose every call outlives any reasonable deadline.
  struct StalledStore;

  #[async_trait]
  impl TaskStore for StalledStore {
    async fn insert(&self, _task: &Task) -> Result<(), TaskError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(())
    }

    async fn find_many(&self, _: TaskFilter, _: SortOrder, _: Option<u64>) -> Result<Vec<Task>, TaskError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(vec![])
    }

    async fn find_one_and_update(&self, _: TaskFilter, _: &TaskUpdate, _: SortOrder) -> Result<Option<Task>, TaskError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(None)
    }

    async fn update_one(&self, _: TaskFilter, _: &TaskUpdate) -> Result<u64, TaskError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(0)
    }

    async fn count(&self, _: TaskFilter) -> Result<u64, TaskError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(0)
    }
  }

  struct BrokenStore;

  #[async_trait]
  impl TaskStore for BrokenStore {
    async fn insert(&self, _task: &Task) -> Result<(), TaskError> {
      Err(TaskError::Persistence("connection refused".into()))
    }

    async fn find_many(&self, _: TaskFilter, _: SortOrder, _: Option<u64>) -> Result<Vec<Task>, TaskError> {
      Err(TaskError::Persistence("connection refused".into()))
    }

    async fn find_one_and_update(&self, _: TaskFilter, _: &TaskUpdate, _: SortOrder) -> Result<Option<Task>, TaskError> {
      Err(TaskError::Persistence("connection refused".into()))
    }

    async fn update_one(&self, _: TaskFilter, _: &TaskUpdate) -> Result<u64, TaskError> {
      Err(TaskError::Persistence("connection refused".into()))
    }

    async fn count(&self, _: TaskFilter) -> Result<u64, TaskError> {
      Err(TaskError::Persistence("connection refused".into()))
    }
  }

  /// Applies the claim, then overruns the deadline before answering.
  struct CommitThenStallStore {
    inner: Arc<InMemoryTaskStore>,
  }

  #[async_trait]
  impl TaskStore for CommitThenStallStore {
    async fn insert(&self, task: &Task) -> Result<(), TaskError> {
      self.inner.insert(task).await
    }

    async fn find_many(&self, filter: TaskFilter, sort: SortOrder, limit: Option<u64>) -> Result<Vec<Task>, TaskError> {
      self.inner.find_many(filter, sort, limit).await
    }

    async fn find_one_and_update(&self, filter: TaskFilter, update: &TaskUpdate, sort: SortOrder) -> Result<Option<Task>, TaskError> {
      let claimed = self.inner.find_one_and_update(filter, update, sort).await;
      tokio::time::sleep(Duration::from_secs(60)).await;
      claimed
    }

    async fn update_one(&self, filter: TaskFilter, update: &TaskUpdate) -> Result<u64, TaskError> {
      self.inner.update_one(filter, update).await
    }

    async fn count(&self, filter: TaskFilter) -> Result<u64, TaskError> {
      self.inner.count(filter).await
    }
  }

  #[tokio::test]
  async fn create_assigns_missing_id_and_timestamp() {
    let repo = repo();
    let task = assert_ok!(repo.create(Task::new("A", "payload")).await);

    assert!(task.has_id());
    assert!(task.has_created_at());
    assert_eq!(repo.get_by_id(task.id).await.unwrap(), Some(task));
  }

  #[tokio::test]
  async fn create_keeps_caller_supplied_id_and_timestamp() {
    let repo = repo();
    let id = Uuid::new_v4();
    let created_at = Utc.with_ymd_and_hms(2023, 5, 1, 8, 30, 0).unwrap();
    let task = repo
      .create(Task { id, created_at, ..Task::new("A", "") })
      .await
      .unwrap();

    assert_eq!(task.id, id);
    assert_eq!(task.created_at, created_at);
  }

  #[tokio::test]
  async fn create_does_not_validate_title() {
    let repo = repo();
    assert_ok!(repo.create(Task::new("", "")).await);
    assert_eq!(repo.count_all().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn get_by_id_returns_none_for_unknown_id() {
    assert_eq!(repo().get_by_id(Uuid::new_v4()).await.unwrap(), None);
  }

  #[tokio::test]
  async fn claim_on_empty_store_is_not_an_error() {
    assert_eq!(assert_ok!(repo().claim("w1").await), None);
  }

  #[tokio::test]
  async fn mark_processed_unknown_id_is_reported() {
    let id = Uuid::new_v4();
    let err = assert_err!(repo().mark_processed(id, "done").await);
    assert!(matches!(err, TaskError::UnknownTask(unknown) if unknown == id));
  }

  #[tokio::test]
  async fn mark_processed_refuses_a_pending_task() {
    let repo = repo();
    let task = repo.create(Task::new("A", "")).await.unwrap();

    let err = assert_err!(repo.mark_processed(task.id, "too early").await);
    assert!(matches!(err, TaskError::InvalidTransition(id) if id == task.id));

    let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert!(!stored.processed);
    assert_eq!(stored.result, None);
    assert_eq!(stored.processed_at, None);
    assert_eq!(repo.count_pending().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn mark_processed_twice_keeps_first_outcome() {
    let repo = repo();
    let task = repo.create(Task::new("A", "")).await.unwrap();
    repo.claim("w1").await.unwrap();
    repo.mark_processed(task.id, "first").await.unwrap();
    let first = repo.get_by_id(task.id).await.unwrap().unwrap();

    let err = assert_err!(repo.mark_processed(task.id, "second").await);
    assert!(matches!(err, TaskError::InvalidTransition(_)));

    let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.result.as_deref(), Some("first"));
    assert_eq!(stored.processed_at, first.processed_at);
  }

  #[tokio::test]
  async fn any_worker_may_complete_a_claimed_task() {
    let repo = repo();
    let task = repo.create(Task::new("A", "")).await.unwrap();
    repo.claim("w1").await.unwrap();
    assert_ok!(repo.mark_processed(task.id, "done by w2").await);

    let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert!(stored.processed);
    assert!(stored.processed_at.is_some());
    assert_eq!(stored.claimed_by.as_deref(), Some("w1"));
    assert_eq!(stored.result.as_deref(), Some("done by w2"));
  }

  #[tokio::test]
  async fn stats_split_by_lifecycle_stage() {
    let repo = repo();
    let a = repo.create(Task::new("A", "")).await.unwrap();
    repo.create(Task::new("B", "")).await.unwrap();
    repo.create(Task::new("C", "")).await.unwrap();
    repo.claim("w1").await.unwrap();
    repo.claim("w2").await.unwrap();
    repo.mark_processed(a.id, "ok").await.unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats, TaskStats { total: 3, pending: 1, in_flight: 1, processed: 1 });
  }

  #[tokio::test]
  async fn slow_store_call_times_out() {
    let repo = TaskRepository::new(Arc::new(StalledStore)).with_call_timeout(Duration::from_millis(20));

    let err = assert_err!(repo.claim("w1").await);
    assert!(err.is_timeout());
    assert!(matches!(err, TaskError::Timeout { operation: "claim", .. }));

    let err = assert_err!(repo.count_pending().await);
    assert!(err.is_timeout());
  }

  #[tokio::test]
  async fn timed_out_claim_may_still_have_taken_the_task() {
    let inner = Arc::new(InMemoryTaskStore::new());
    let repo = TaskRepository::new(Arc::new(CommitThenStallStore { inner: inner.clone() }))
      .with_call_timeout(Duration::from_millis(20));
    let task = repo.create(Task::new("A", "")).await.unwrap();

    let err = assert_err!(repo.claim("w1").await);
    assert!(matches!(err, TaskError::Timeout { operation: "claim", .. }));

    let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::InFlight);
    assert_eq!(stored.claimed_by.as_deref(), Some("w1"));
    assert_eq!(stored.attempts, 1);
    assert_eq!(repo.count_pending().await.unwrap(), 0);

    // the holder can still complete it
    assert_ok!(repo.mark_processed(task.id, "done").await);
  }

  #[tokio::test]
  async fn store_failures_surface_as_persistence_errors() {
    let repo = TaskRepository::new(Arc::new(BrokenStore));

    assert!(matches!(repo.create(Task::new("A", "")).await, Err(TaskError::Persistence(_))));
    assert!(matches!(repo.claim("w1").await, Err(TaskError::Persistence(_))));
    assert!(matches!(repo.mark_processed(Uuid::new_v4(), "x").await, Err(TaskError::Persistence(_))));
    assert!(matches!(repo.find_all(0).await, Err(TaskError::Persistence(_))));
  }
}
