use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub type TaskId = Uuid;

/// A unit of work. Moves Pending -> Claimed -> Processed and never back.
///
/// A nil `id` or a default `created_at` means "not assigned yet"; the
/// repository fills both in on create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
  #[serde(default)]
  pub id: TaskId,
  pub title: String,
  #[serde(default)]
  pub payload: String,
  #[serde(default)]
  pub processed: bool,
  #[serde(default)]
  pub attempts: i32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub claimed_by: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub claimed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub processed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<String>,
  #[serde(default)]
  pub created_at: DateTime<Utc>,
}

impl Task {
  /// An unsaved task; `id` and `created_at` are assigned on create.
  pub fn new(title: impl Into<String>, payload: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      payload: payload.into(),
      ..Default::default()
    }
  }

  pub fn has_id(&self) -> bool {
    !self.id.is_nil()
  }

  pub fn has_created_at(&self) -> bool {
    self.created_at != DateTime::<Utc>::default()
  }

  pub fn status(&self) -> TaskStatus {
    if self.processed {
      TaskStatus::Processed
    } else if self.claimed_by.is_some() {
      TaskStatus::InFlight
    } else {
      TaskStatus::Pending
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  InFlight,
  Processed,
}

impl TaskStatus {
  pub fn label(self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::InFlight => "in flight",
      TaskStatus::Processed => "processed",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
  pub total: u64,
  pub pending: u64,
  pub in_flight: u64,
  pub processed: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_task_is_unassigned_and_pending() {
    let task = Task::new("send welcome email", r#"{"to":"user@example.com"}"#);
    assert!(!task.has_id());
    assert!(!task.has_created_at());
    assert_eq!(task.attempts, 0);
    assert_eq!(task.status(), TaskStatus::Pending);
  }

  #[test]
  fn status_follows_claim_and_completion_fields() {
    let mut task = Task::new("resize image", "");
    task.claimed_by = Some("w1".into());
    assert_eq!(task.status(), TaskStatus::InFlight);

    task.processed = true;
    assert_eq!(task.status(), TaskStatus::Processed);
  }

  #[test]
  fn json_uses_snake_case_fields_and_omits_absent_optionals() {
    let task = Task {
      id: Uuid::new_v4(),
      ..Task::new("monthly report", "opaque")
    };
    let value = serde_json::to_value(&task).unwrap();
    let obj = value.as_object().unwrap();

    for key in ["id", "title", "payload", "processed", "attempts", "created_at"] {
      assert!(obj.contains_key(key), "missing {key}");
    }
    for key in ["claimed_by", "claimed_at", "processed_at", "result"] {
      assert!(!obj.contains_key(key), "unexpected {key}");
    }
  }

  #[test]
  fn json_accepts_minimal_body() {
    let task: Task = serde_json::from_str(r#"{"title":"A"}"#).unwrap();
    assert_eq!(task.title, "A");
    assert!(!task.has_id());
    assert!(task.payload.is_empty());
  }
}
