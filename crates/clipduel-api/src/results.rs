//! Handlers for ballot-wide, read-only endpoints.

use axum::{Json, extract::State};
use clipduel_core::{store::BallotStore, vote::Tally};
use serde::Serialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct DeadlineBody {
  /// Epoch milliseconds.
  pub deadline: i64,
}

/// `GET /vote/deadline`
pub async fn deadline<S>(State(state): State<AppState<S>>) -> Json<DeadlineBody>
where
  S: BallotStore + 'static,
{
  Json(DeadlineBody { deadline: state.ballot.deadline_ms() })
}

/// `GET /vote/totals`
pub async fn totals<S>(State(state): State<AppState<S>>) -> Result<Json<Tally>, ApiError>
where
  S: BallotStore + 'static,
{
  Ok(Json(state.ballot.totals().await?))
}
