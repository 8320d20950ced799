use std::env;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::error::ConfigError;
use crate::repository::DEFAULT_CALL_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: Option<String>,
  pub server_port: u16,
  pub worker_id: String,
  pub worker_concurrency: usize,
  pub poll_interval: Duration,
  pub store_timeout: Duration,
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
  match raw {
    None => Ok(default),
    Some(value) => value
      .trim()
      .parse()
      .map_err(|_| ConfigError::Invalid { key, value }),
  }
}

impl Config {
  /// Read configuration from the process environment. A `.env` file in the
  /// working directory is loaded first if present.
  pub fn from_env() -> Result<Self, ConfigError> {
    let _ = dotenvy::dotenv();
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let worker_concurrency = parse("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"), 1usize)?;
    if worker_concurrency == 0 {
      return Err(ConfigError::Invalid {
        key: "WORKER_CONCURRENCY",
        value: "0".into(),
      });
    }

    Ok(Self {
      database_url: get("DATABASE_URL"),
      server_port: parse("SERVER_PORT", get("SERVER_PORT"), 8080)?,
      worker_id: get("WORKER_ID").unwrap_or_else(default_worker_id),
      worker_concurrency,
      poll_interval: Duration::from_millis(parse("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"), 500)?),
      store_timeout: Duration::from_secs(parse(
        "STORE_TIMEOUT_SECS",
        get("STORE_TIMEOUT_SECS"),
        DEFAULT_CALL_TIMEOUT.as_secs(),
      )?),
    })
  }

  pub fn require_database_url(&self) -> Result<&str, ConfigError> {
    self
      .database_url
      .as_deref()
      .ok_or(ConfigError::Missing("DATABASE_URL"))
  }
}

fn default_worker_id() -> String {
  let id = Uuid::new_v4().simple().to_string();
  format!("worker-{}", &id[..8])
}
