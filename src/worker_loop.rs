//! Claim -> process -> complete loop run by worker processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::Task;
use crate::repository::TaskRepository;
use crate::worker_processing::TaskProcessor;

/// What one worker did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
  pub worker_id: String,
  pub claimed: u64,
  pub completed: u64,
  pub failed: u64,
}

/// Group of workers sharing one repository and one processor.
/// - `request_shutdown` stops every worker from claiming more tasks
/// - `shutdown_and_join` also waits for in-flight processing to finish
pub struct WorkerGroup {
  shutdown_tx: watch::Sender<bool>,
  joins: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerGroup {
  /// Spawn `n` workers named `{prefix}-{i}`, or just `prefix` when `n == 1`.
  pub fn spawn(
    n: usize,
    prefix: &str,
    repo: TaskRepository,
    processor: Arc<dyn TaskProcessor>,
    poll_interval: Duration,
  ) -> Self {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let joins = (0..n)
      .map(|i| {
        let worker_id = if n == 1 { prefix.to_string() } else { format!("{prefix}-{i}") };
        tokio::spawn(run_worker(
          repo.clone(),
          worker_id,
          Arc::clone(&processor),
          poll_interval,
          shutdown_rx.clone(),
        ))
      })
      .collect();

    Self { shutdown_tx, joins }
  }

  pub fn request_shutdown(&self) {
    // receivers may already be gone
    let _ = self.shutdown_tx.send(true);
  }

  pub async fn shutdown_and_join(self) -> Vec<WorkerReport> {
    self.request_shutdown();
    let mut reports = Vec::with_capacity(self.joins.len());
    for join in futures::future::join_all(self.joins).await {
      match join {
        Ok(report) => reports.push(report),
        Err(e) => error!("worker task panicked or was cancelled: {e}"),
      }
    }
    reports
  }
}

/// Run until `shutdown` flips to `true` (or its sender is dropped).
///
/// Store errors are logged and retried on the next poll. A processing failure
/// leaves the task in flight: there is no requeue of abandoned claims.
pub async fn run_worker(
  repo: TaskRepository,
  worker_id: String,
  processor: Arc<dyn TaskProcessor>,
  poll_interval: Duration,
  mut shutdown: watch::Receiver<bool>,
) -> WorkerReport {
  let mut report = WorkerReport {
    worker_id: worker_id.clone(),
    ..Default::default()
  };
  info!(worker_id = %worker_id, "worker started");

  loop {
    if *shutdown.borrow() {
      break;
    }

    let idle = match repo.claim(&worker_id).await {
      Ok(Some(task)) => {
        report.claimed += 1;
        handle_task(&repo, &worker_id, processor.as_ref(), task, &mut report).await;
        false
      }
      Ok(None) => true,
      Err(e) if e.is_timeout() => {
        warn!(worker_id = %worker_id, "claim timed out, outcome unknown: {e}");
        true
      }
      Err(e) => {
        warn!(worker_id = %worker_id, "claim failed: {e}");
        true
      }
    };

    if idle {
      tokio::select! {
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
        _ = tokio::time::sleep(poll_interval) => {}
      }
    }
  }

  info!(
    worker_id = %worker_id,
    claimed = report.claimed,
    completed = report.completed,
    failed = report.failed,
    "worker stopped"
  );
  report
}

async fn handle_task(
  repo: &TaskRepository,
  worker_id: &str,
  processor: &dyn TaskProcessor,
  task: Task,
  report: &mut WorkerReport,
) {
  match processor.process(&task, worker_id).await {
    Ok(result) => match repo.mark_processed(task.id, result).await {
      Ok(()) => report.completed += 1,
      Err(e) => {
        error!(task_id = %task.id, "failed to record completion: {e}");
        report.failed += 1;
      }
    },
    Err(e) => {
      error!(task_id = %task.id, attempts = task.attempts, "processing failed, task stays claimed: {e:#}");
      report.failed += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use anyhow::anyhow;
  use async_trait::async_trait;

  use super::*;
  use crate::store::InMemoryTaskStore;
  use crate::worker_processing::SimulatedProcessor;

  struct FailingProcessor;

  #[async_trait]
  impl TaskProcessor for FailingProcessor {
    async fn process(&self, _task: &Task, _worker_id: &str) -> anyhow::Result<String> {
      Err(anyhow!("boom"))
    }
  }

  async fn seeded_repo(n: usize) -> TaskRepository {
    let repo = TaskRepository::new(Arc::new(InMemoryTaskStore::new()));
    for i in 0..n {
      repo.create(Task::new(format!("task-{i}"), "")).await.unwrap();
    }
    repo
  }

  async fn wait_until(repo: &TaskRepository, done: impl Fn(&crate::models::TaskStats) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
      loop {
        if done(&repo.stats().await.unwrap()) {
          return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("workers did not drain the queue in time");
  }

  #[tokio::test]
  async fn group_processes_every_task_once() {
    let repo = seeded_repo(12).await;
    let group = WorkerGroup::spawn(
      3,
      "w",
      repo.clone(),
      Arc::new(SimulatedProcessor::new(Duration::from_millis(2))),
      Duration::from_millis(5),
    );

    wait_until(&repo, |s| s.processed == 12).await;
    let reports = group.shutdown_and_join().await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().map(|r| r.completed).sum::<u64>(), 12);
    assert_eq!(reports.iter().map(|r| r.claimed).sum::<u64>(), 12);

    for task in repo.find_all(0).await.unwrap() {
      assert_eq!(task.attempts, 1);
      let worker = task.claimed_by.unwrap();
      assert!(worker.starts_with("w-"));
      assert_eq!(task.result.unwrap(), format!("processed successfully by {worker}"));
    }
  }

  #[tokio::test]
  async fn failed_processing_leaves_task_in_flight() {
    let repo = seeded_repo(2).await;
    let group = WorkerGroup::spawn(1, "solo", repo.clone(), Arc::new(FailingProcessor), Duration::from_millis(5));

    wait_until(&repo, |s| s.in_flight == 2).await;
    let reports = group.shutdown_and_join().await;

    assert_eq!(reports[0].worker_id, "solo");
    assert_eq!(reports[0].failed, 2);
    assert_eq!(reports[0].completed, 0);
    assert_eq!(repo.count_pending().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn worker_stops_when_shutdown_sender_is_dropped() {
    let repo = seeded_repo(0).await;
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_worker(
      repo,
      "idle".into(),
      Arc::new(SimulatedProcessor::default()),
      Duration::from_secs(30),
      rx,
    ));
    drop(tx);

    let report = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(report.claimed, 0);
  }
}
