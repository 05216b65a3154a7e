//! Runtime server configuration.
//!
//! Layered from an optional TOML file and `CLIPDUEL_*` environment variables.
//! Nested keys use a double underscore, e.g. `CLIPDUEL_RATE_LIMIT__ENABLED`.

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use clipduel_core::ratelimit::RateLimitPolicy;
use clipduel_store_sqlite::StoreOptions;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CLIPDUEL";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                 String,
  #[serde(default = "default_port")]
  pub port:                 u16,
  #[serde(default = "default_db_path")]
  pub db_path:              PathBuf,
  /// Last instant at which votes are accepted (RFC 3339).
  pub deadline:             DateTime<Utc>,
  /// Take client identity from `X-Forwarded-For` / `X-Real-IP`.
  #[serde(default)]
  pub behind_proxy:         bool,
  /// Directory served for every path the API does not claim.
  #[serde(default)]
  pub static_dir:           Option<PathBuf>,
  /// Item urls inserted at startup if not already present.
  #[serde(default)]
  pub seed_items:           Vec<String>,
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms:      u64,
  #[serde(default = "default_acquire_timeout_ms")]
  pub acquire_timeout_ms:   u64,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  #[serde(default = "default_shutdown_grace_secs")]
  pub shutdown_grace_secs:  u64,
  #[serde(default)]
  pub rate_limit:           RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub enabled:         bool,
  pub min_interval_ms: u64,
  pub max_failures:    u32,
  pub ban_secs:        u64,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    let policy = RateLimitPolicy::default();
    Self {
      enabled:         policy.enabled,
      min_interval_ms: u64::try_from(policy.min_interval.as_millis()).unwrap_or(u64::MAX),
      max_failures:    policy.max_failures,
      ban_secs:        policy.ban_duration.as_secs(),
    }
  }
}

fn default_host() -> String { "0.0.0.0".to_owned() }
fn default_port() -> u16 { 8081 }
fn default_db_path() -> PathBuf { PathBuf::from("votes.db") }
fn default_busy_timeout_ms() -> u64 { 5_000 }
fn default_acquire_timeout_ms() -> u64 { 5_000 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_shutdown_grace_secs() -> u64 { 5 }

impl ServerConfig {
  /// Read `path` (if it exists) and overlay the environment.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from(path.into()).required(false))
      .add_source(
        Environment::with_prefix(ENV_PREFIX)
          .prefix_separator("_")
          .separator("__")
          .list_separator(",")
          .with_list_parse_key("seed_items")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn store_options(&self) -> StoreOptions {
    StoreOptions {
      read_pool_size:  None,
      busy_timeout:    Duration::from_millis(self.busy_timeout_ms),
      acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
    }
  }

  pub fn rate_limit_policy(&self) -> RateLimitPolicy {
    RateLimitPolicy {
      enabled:      self.rate_limit.enabled,
      min_interval: Duration::from_millis(self.rate_limit.min_interval_ms),
      max_failures: self.rate_limit.max_failures,
      ban_duration: Duration::from_secs(self.rate_limit.ban_secs),
    }
  }

  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

  pub fn shutdown_grace(&self) -> Duration { Duration::from_secs(self.shutdown_grace_secs) }
}
