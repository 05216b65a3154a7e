//! Error types for `clipduel-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("voting is closed")]
  VotingClosed,

  #[error("rate limited until {reset_at_ms}")]
  RateLimited { reset_at_ms: i64 },

  /// The submitted choice is not one of the two offered items.
  #[error("invalid choice: {0:?}")]
  InvalidChoice(String),

  #[error("no choice given")]
  EmptyChoice,

  #[error("invalid item url: {0:?}")]
  InvalidItemUrl(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
