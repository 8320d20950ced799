use std::convert::Infallible;

use serde_json::json;
use warp::Filter;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::TaskError;
use crate::repository::TaskRepository;

pub mod tasks;
pub mod sse;

pub fn routes(
  repo: TaskRepository
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  tasks::task_routes(repo.clone())
    .or(sse::sse_route(repo))
}

/// Errors a handler can reject with; turned into JSON bodies by
/// [`handle_rejection`].
#[derive(Debug)]
pub enum ApiError {
  BadRequest(String),
  NotFound(String),
  Task(TaskError),
}

impl warp::reject::Reject for ApiError {}

impl From<TaskError> for ApiError {
  fn from(err: TaskError) -> Self {
    ApiError::Task(err)
  }
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Task(TaskError::UnknownTask(_)) => StatusCode::NOT_FOUND,
      ApiError::Task(TaskError::InvalidTransition(_)) => StatusCode::CONFLICT,
      ApiError::Task(TaskError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
      ApiError::Task(TaskError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn message(&self) -> String {
    match self {
      ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
      ApiError::Task(err) => err.to_string(),
    }
  }
}

pub fn reject(err: impl Into<ApiError>) -> Rejection {
  warp::reject::custom(err.into())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, message) = if let Some(api) = err.find::<ApiError>() {
    (api.status(), api.message())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "not found".to_string())
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
  } else {
    tracing::error!("unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
  };

  Ok(warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status))
}
