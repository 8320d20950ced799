use std::time::Duration;

use thiserror::Error;

use crate::models::TaskId;

/// Failures surfaced by the task repository and its store adapters.
///
/// "No pending task" is not an error: `claim` returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum TaskError {
  /// The store was unreachable or rejected the operation.
  #[error("persistence error: {0}")]
  Persistence(String),

  /// The store call did not finish within its deadline. Any mutation it
  /// carried may or may not have been applied.
  #[error("{operation} timed out after {after:?}")]
  Timeout {
    operation: &'static str,
    after: Duration,
  },

  #[error("no task with id {0}")]
  UnknownTask(TaskId),

  /// Completion was requested for a task that is pending or already
  /// processed. Only an in-flight task can be completed.
  #[error("task {0} is not in flight")]
  InvalidTransition(TaskId),
}

impl TaskError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, TaskError::Timeout { .. })
  }
}

impl From<sqlx::Error> for TaskError {
  fn from(err: sqlx::Error) -> Self {
    TaskError::Persistence(err.to_string())
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("{0} is not set")]
  Missing(&'static str),

  #[error("{key} has invalid value {value:?}")]
  Invalid { key: &'static str, value: String },
}
