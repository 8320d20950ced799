pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod repository;
pub mod routes;
pub mod store;
pub mod worker_loop;
pub mod worker_processing;

pub use error::{ConfigError, TaskError};
pub use models::{Task, TaskId, TaskStats, TaskStatus};
pub use repository::TaskRepository;

/// Initialize tracing for the binaries. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();
}
