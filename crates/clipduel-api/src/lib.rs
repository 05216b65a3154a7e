//! JSON voting API for clipduel.
//!
//! Exposes an axum [`Router`] backed by a [`Ballot`] over any
//! [`BallotStore`]. TLS, static files and transport concerns are the caller's
//! responsibility. Clients are identified by IP, so the router must be served
//! with `into_make_service_with_connect_info::<SocketAddr>()`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(clipduel_api::api_router(AppState::new(ballot, false)))
//! ```

pub mod client;
pub mod error;
pub mod results;
pub mod vote;

use axum::{
  Router,
  routing::{get, post},
};
use clipduel_core::{ballot::Ballot, store::BallotStore};

pub use client::ClientIp;
pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub ballot:       Ballot<S>,
  /// Trust `X-Forwarded-For` / `X-Real-IP` for client identity.
  pub behind_proxy: bool,
}

impl<S> AppState<S> {
  pub fn new(ballot: Ballot<S>, behind_proxy: bool) -> Self {
    Self { ballot, behind_proxy }
  }
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { ballot: self.ballot.clone(), behind_proxy: self.behind_proxy }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be merged into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: BallotStore + 'static,
{
  Router::new()
    .route("/vote/next",     get(vote::next::<S>))
    .route("/vote/submit",   post(vote::submit::<S>))
    .route("/vote/mine",     get(vote::mine::<S>))
    .route("/vote/deadline", get(results::deadline::<S>))
    .route("/vote/totals",   get(results::totals::<S>))
    .with_state(state)
}
