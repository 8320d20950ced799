//! PostgreSQL task store.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{SortOrder, TaskFilter, TaskStore, TaskUpdate};
use crate::error::TaskError;
use crate::models::Task;

const TASK_COLUMNS: &str = "id, title, payload, processed, attempts, claimed_by, claimed_at, processed_at, result, created_at";

/// Task store backed by the `tasks` table.
///
/// The pool is owned by the application; cloning the store shares it.
#[derive(Clone)]
pub struct PgTaskStore {
  pool: PgPool,
}

impl PgTaskStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: TaskFilter) {
  match filter {
    TaskFilter::All => qb.push("TRUE"),
    TaskFilter::Pending => qb.push("processed = FALSE AND claimed_by IS NULL"),
    TaskFilter::InFlight => qb.push("processed = FALSE AND claimed_by IS NOT NULL"),
    TaskFilter::Processed => qb.push("processed = TRUE"),
    TaskFilter::ById(id) => qb.push("id = ").push_bind(id),
    TaskFilter::InFlightById(id) => qb
      .push("id = ")
      .push_bind(id)
      .push(" AND processed = FALSE AND claimed_by IS NOT NULL"),
  };
}

fn push_set(qb: &mut QueryBuilder<'_, Postgres>, update: &TaskUpdate) {
  match update {
    TaskUpdate::Claim { worker_id, at } => {
      qb.push("claimed_by = ")
        .push_bind(worker_id.clone())
        .push(", claimed_at = ")
        .push_bind(*at)
        .push(", attempts = attempts + 1");
    }
    TaskUpdate::Complete { result, at } => {
      qb.push("processed = TRUE, processed_at = ")
        .push_bind(*at)
        .push(", result = ")
        .push_bind(result.clone());
    }
  }
}

fn order_by(sort: SortOrder) -> &'static str {
  match sort {
    SortOrder::CreatedAtAsc => " ORDER BY created_at ASC, id ASC",
    SortOrder::CreatedAtDesc => " ORDER BY created_at DESC, id DESC",
  }
}

fn insert_query(task: &Task) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new(format!("INSERT INTO tasks ({TASK_COLUMNS}) "));
  qb.push_values(std::iter::once(task.clone()), |mut row, task| {
    row
      .push_bind(task.id)
      .push_bind(task.title)
      .push_bind(task.payload)
      .push_bind(task.processed)
      .push_bind(task.attempts)
      .push_bind(task.claimed_by)
      .push_bind(task.claimed_at)
      .push_bind(task.processed_at)
      .push_bind(task.result)
      .push_bind(task.created_at);
  });
  qb
}

fn find_many_query(filter: TaskFilter, sort: SortOrder, limit: Option<u64>) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE "));
  push_filter(&mut qb, filter);
  qb.push(order_by(sort));
  if let Some(limit) = limit {
    qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
  }
  qb
}

/// One statement: lock the first matching row (skipping rows another
/// transaction holds), update it, return the new version. The outer filter is
/// re-checked so a row that stopped matching is never updated.
fn find_one_and_update_query(filter: TaskFilter, update: &TaskUpdate, sort: SortOrder) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new("UPDATE tasks SET ");
  push_set(&mut qb, update);
  qb.push(" WHERE id = (SELECT id FROM tasks WHERE ");
  push_filter(&mut qb, filter);
  qb.push(order_by(sort));
  qb.push(" LIMIT 1 FOR UPDATE SKIP LOCKED) AND ");
  push_filter(&mut qb, filter);
  qb.push(format!(" RETURNING {TASK_COLUMNS}"));
  qb
}

/// The filter is repeated outside the subquery so that a concurrent writer
/// which changed the row first makes this update match nothing.
fn update_one_query(filter: TaskFilter, update: &TaskUpdate) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new("UPDATE tasks SET ");
  push_set(&mut qb, update);
  qb.push(" WHERE id = (SELECT id FROM tasks WHERE ");
  push_filter(&mut qb, filter);
  qb.push(" LIMIT 1) AND ");
  push_filter(&mut qb, filter);
  qb
}

fn count_query(filter: TaskFilter) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM tasks WHERE ");
  push_filter(&mut qb, filter);
  qb
}

#[async_trait]
impl TaskStore for PgTaskStore {
  async fn insert(&self, task: &Task) -> Result<(), TaskError> {
    insert_query(task).build().execute(&self.pool).await?;
    Ok(())
  }

  async fn find_many(
    &self,
    filter: TaskFilter,
    sort: SortOrder,
    limit: Option<u64>,
  ) -> Result<Vec<Task>, TaskError> {
    let tasks = find_many_query(filter, sort, limit)
      .build_query_as::<Task>()
      .fetch_all(&self.pool)
      .await?;
    Ok(tasks)
  }

  #[tracing::instrument(skip(self, update))]
  async fn find_one_and_update(
    &self,
    filter: TaskFilter,
    update: &TaskUpdate,
    sort: SortOrder,
  ) -> Result<Option<Task>, TaskError> {
    let task = find_one_and_update_query(filter, update, sort)
      .build_query_as::<Task>()
      .fetch_optional(&self.pool)
      .await?;
    debug!(matched = task.is_some(), "find_one_and_update finished");
    Ok(task)
  }

  async fn update_one(&self, filter: TaskFilter, update: &TaskUpdate) -> Result<u64, TaskError> {
    let done = update_one_query(filter, update)
      .build()
      .execute(&self.pool)
      .await?;
    Ok(done.rows_affected())
  }

  async fn count(&self, filter: TaskFilter) -> Result<u64, TaskError> {
    let count: i64 = count_query(filter)
      .build_query_scalar()
      .fetch_one(&self.pool)
      .await?;
    Ok(u64::try_from(count).unwrap_or(0))
  }
}
