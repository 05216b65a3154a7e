//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error body is `{"message": "..."}`. Storage failures are already
//! logged by the ballot service and answer with a generic message.

use axum::{
  Json,
  http::{HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Header carrying the epoch-ms instant a rate-limit ban lifts.
pub const RATELIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("voting is closed")]
  VotingClosed,

  #[error("rate limited until {0}")]
  RateLimited(i64),

  #[error("invalid choice")]
  InvalidChoice,

  #[error("no choice given")]
  EmptyChoice,

  #[error("malformed form: {0}")]
  MalformedForm(String),

  #[error("client address unavailable")]
  MissingClientAddress,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<clipduel_core::Error> for ApiError {
  fn from(e: clipduel_core::Error) -> Self {
    use clipduel_core::Error as Core;
    match e {
      Core::VotingClosed                 => ApiError::VotingClosed,
      Core::RateLimited { reset_at_ms }  => ApiError::RateLimited(reset_at_ms),
      Core::InvalidChoice(_)             => ApiError::InvalidChoice,
      Core::EmptyChoice                  => ApiError::EmptyChoice,
      // No route accepts item urls; reaching this is a server fault.
      e @ Core::InvalidItemUrl(_)        => ApiError::Store(Box::new(e)),
      Core::Store(e)                     => ApiError::Store(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::VotingClosed => (StatusCode::FORBIDDEN, "Voting is closed".to_owned()),
      ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "Ratelimited".to_owned()),
      ApiError::InvalidChoice => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid choice".to_owned()),
      ApiError::EmptyChoice => (StatusCode::BAD_REQUEST, "No choice given".to_owned()),
      ApiError::MalformedForm(_) => {
        (StatusCode::NOT_ACCEPTABLE, "Failed to parse form input".to_owned())
      }
      ApiError::MissingClientAddress => {
        (StatusCode::INTERNAL_SERVER_ERROR, "Could not determine client address".to_owned())
      }
      ApiError::Store(_) => {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to communicate with database".to_owned())
      }
    };

    let mut res = (status, Json(json!({ "message": message }))).into_response();
    if let ApiError::RateLimited(reset_at_ms) = self {
      if let Ok(value) = HeaderValue::from_str(&reset_at_ms.to_string()) {
        res.headers_mut().insert(RATELIMIT_RESET_HEADER, value);
      }
    }
    res
  }
}
