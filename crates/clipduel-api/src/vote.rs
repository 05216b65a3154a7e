//! Handlers for the per-user voting endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/vote/next`   | Assigns and returns `{"a","b"}`; a message once nothing is left |
//! | `POST` | `/vote/submit` | Form field `choice`; 204 on success |
//! | `GET`  | `/vote/mine`   | Urls this user voted for |

use axum::{
  Json,
  extract::{Form, State, rejection::FormRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use clipduel_core::store::BallotStore;
use serde::Deserialize;
use serde_json::json;

use crate::{AppState, client::ClientIp, error::ApiError};

/// Body of `GET /vote/next` once the user has seen every item.
pub const NO_MORE_ITEMS: &str = "No more items to vote on!";

// ─── Next ─────────────────────────────────────────────────────────────────────

/// `GET /vote/next`
pub async fn next<S>(
  State(state): State<AppState<S>>,
  ClientIp(ip): ClientIp,
) -> Result<Response, ApiError>
where
  S: BallotStore + 'static,
{
  // Checked before identify so a closed ballot never creates users.
  state.ballot.ensure_open()?;
  let user = state.ballot.identify(&ip).await?;

  let res = match state.ballot.next_pair(&user).await? {
    Some(pair) => Json(pair).into_response(),
    None       => Json(json!({ "message": NO_MORE_ITEMS })).into_response(),
  };
  Ok(res)
}

// ─── Submit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitForm {
  #[serde(default)]
  pub choice: String,
}

/// `POST /vote/submit` — form body: `choice=<url>`
pub async fn submit<S>(
  State(state): State<AppState<S>>,
  ClientIp(ip): ClientIp,
  form: Result<Form<SubmitForm>, FormRejection>,
) -> Result<StatusCode, ApiError>
where
  S: BallotStore + 'static,
{
  state.ballot.ensure_open()?;
  let Form(form) = form.map_err(|e| ApiError::MalformedForm(e.body_text()))?;
  let user = state.ballot.identify(&ip).await?;

  state.ballot.submit(&user, form.choice.trim()).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Mine ─────────────────────────────────────────────────────────────────────

/// `GET /vote/mine`
pub async fn mine<S>(
  State(state): State<AppState<S>>,
  ClientIp(ip): ClientIp,
) -> Result<Json<Vec<String>>, ApiError>
where
  S: BallotStore + 'static,
{
  let user  = state.ballot.identify(&ip).await?;
  let votes = state.ballot.my_votes(&user).await?;
  Ok(Json(votes))
}
