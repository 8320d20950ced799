use warp::Filter;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::warn;

use crate::repository::TaskRepository;

const STATS_INTERVAL: Duration = Duration::from_secs(2);

fn with_repo(repo: TaskRepository) -> impl Filter<Extract = (TaskRepository,), Error = Infallible> + Clone {
  warp::any().map(move || repo.clone())
}

/// `GET /sse/stats`: queue counts pushed every couple of seconds.
pub fn sse_route(repo: TaskRepository) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("sse" / "stats")
    .and(warp::get())
    .and(with_repo(repo))
    .and_then(handle_sse)
}

async fn handle_sse(repo: TaskRepository) -> Result<impl warp::Reply, warp::Rejection> {
  let interval = IntervalStream::new(tokio::time::interval(STATS_INTERVAL));
  let stream = interval.then(move |_| {
    let repo = repo.clone();
    async move {
      match repo.stats().await {
        Ok(stats) => match warp::sse::Event::default().event("stats").json_data(stats) {
          Ok(event) => Some(Ok::<_, Infallible>(event)),
          Err(e) => {
            warn!("Failed to encode stats event: {:?}", e);
            None
          }
        },
        Err(e) => {
          warn!("Error fetching task stats: {}", e);
          None
        }
      }
    }
  })
    .filter_map(|x| { x });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
