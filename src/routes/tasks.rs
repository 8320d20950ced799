use warp::Filter;
use warp::http::StatusCode;
use warp::Reply;
use serde::Deserialize;
use uuid::Uuid;
use tracing::{info, error};

use crate::models::Task;
use crate::repository::TaskRepository;
use super::{ApiError, reject};

const MAX_TITLE_LEN: usize = 200;

#[derive(Deserialize)]
pub struct NewTask {
  pub title: String,
  #[serde(default)]
  pub payload: String,
}

#[derive(Deserialize)]
pub struct ClaimRequest {
  pub worker_id: String,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
  pub result: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
  pub limit: Option<u64>,
}

fn validate_title(title: &str) -> Result<(), String> {
  let title = title.trim();
  if title.is_empty() {
    return Err("title must not be empty".into());
  }
  if title.chars().count() > MAX_TITLE_LEN {
    return Err(format!("title longer than {} characters", MAX_TITLE_LEN));
  }
  Ok(())
}

pub fn task_routes(repo: TaskRepository) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let create = warp::path!("tasks")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_repo(repo.clone()))
    .and_then(handle_create_task);

  let list = warp::path!("tasks")
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_repo(repo.clone()))
    .and_then(handle_list_tasks);

  let pending = warp::path!("tasks" / "pending")
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_repo(repo.clone()))
    .and_then(handle_list_pending);

  let claim = warp::path!("tasks" / "claim")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_repo(repo.clone()))
    .and_then(handle_claim_task);

  let get = warp::path!("tasks" / Uuid)
    .and(warp::get())
    .and(with_repo(repo.clone()))
    .and_then(handle_get_task);

  let complete = warp::path!("tasks" / Uuid / "complete")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_repo(repo.clone()))
    .and_then(handle_complete_task);

  let stats = warp::path!("stats")
    .and(warp::get())
    .and(with_repo(repo))
    .and_then(handle_stats);

  create
    .or(list)
    .or(pending)
    .or(claim)
    .or(get)
    .or(complete)
    .or(stats)
}

fn with_repo(repo: TaskRepository) -> impl Filter<Extract = (TaskRepository,), Error = std::convert::Infallible> + Clone {
  warp::any().map(move || repo.clone())
}

async fn handle_create_task(new_task: NewTask, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  if let Err(e) = validate_title(&new_task.title) {
    error!("Task validation failed: {}", e);
    return Err(reject(ApiError::BadRequest(e)));
  }

  let task = repo
    .create(Task::new(new_task.title.trim(), new_task.payload))
    .await
    .map_err(|e| {
      error!("Task creation failed: {}", e);
      reject(e)
    })?;

  info!("Task {} created", task.id);
  Ok(warp::reply::with_status(warp::reply::json(&task), StatusCode::CREATED).into_response())
}

async fn handle_list_tasks(query: ListQuery, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  let tasks = repo.find_all(query.limit.unwrap_or(0)).await.map_err(reject)?;
  Ok(warp::reply::json(&tasks).into_response())
}

async fn handle_list_pending(query: ListQuery, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  let tasks = repo.find_pending(query.limit.unwrap_or(0)).await.map_err(reject)?;
  Ok(warp::reply::json(&tasks).into_response())
}

async fn handle_get_task(id: Uuid, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  match repo.get_by_id(id).await.map_err(reject)? {
    Some(task) => Ok(warp::reply::json(&task).into_response()),
    None => Err(reject(ApiError::NotFound(format!("no task with id {}", id)))),
  }
}

async fn handle_claim_task(request: ClaimRequest, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  let worker_id = request.worker_id.trim();
  if worker_id.is_empty() {
    return Err(reject(ApiError::BadRequest("worker_id must not be empty".into())));
  }

  match repo.claim(worker_id).await {
    Ok(Some(task)) => Ok(warp::reply::json(&task).into_response()),
    Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
    Err(e) => {
      error!("Claim for {} failed: {}", worker_id, e);
      Err(reject(e))
    }
  }
}

async fn handle_complete_task(id: Uuid, request: CompleteRequest, repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  repo.mark_processed(id, request.result).await.map_err(reject)?;
  Ok(StatusCode::NO_CONTENT.into_response())
}

async fn handle_stats(repo: TaskRepository) -> Result<warp::reply::Response, warp::Rejection> {
  let stats = repo.stats().await.map_err(reject)?;
  Ok(warp::reply::json(&stats).into_response())
}
