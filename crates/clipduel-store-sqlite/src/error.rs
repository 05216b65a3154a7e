//! Error type for `clipduel-store-sqlite`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] clipduel_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The store has been closed; no further operations are accepted.
  #[error("store is closed")]
  Closed,

  #[error("timed out after {waited:?} waiting for a {pool} connection")]
  PoolTimeout { pool: &'static str, waited: Duration },

  #[error("timestamp out of range: {0}")]
  Timestamp(i64),

  /// A uniqueness conflict on user creation was followed by a failed
  /// re-read.
  #[error("user for {0:?} vanished after insert conflict")]
  UserVanished(String),
}

impl Error {
  pub fn is_closed(&self) -> bool { matches!(self, Self::Closed) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
