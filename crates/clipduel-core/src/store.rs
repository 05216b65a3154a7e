//! The `BallotStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `clipduel-store-sqlite`).
//! The [`Ballot`](crate::ballot::Ballot) service and the HTTP layer depend on
//! this abstraction, not on any concrete backend.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
  item::Item,
  ratelimit::{RateLimitDecision, RateLimitPolicy},
  user::User,
  vote::{ActiveAssignment, Pair, SubmitOutcome, Tally},
};

/// Abstraction over a pairwise-voting store backend.
///
/// Votes are append-only. A user's active assignment is the only row that is
/// ever replaced or deleted.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait BallotStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Setup & lifecycle ─────────────────────────────────────────────────

  /// Create the schema if missing and insert any seed urls not already
  /// present. Safe to run repeatedly. Returns the number of new items.
  fn setup<'a>(
    &'a self,
    seed: &'a [String],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Drain in-flight work for at most `grace`, then close the backend.
  /// Every later call fails fast.
  fn close(
    &self,
    grace: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Items ─────────────────────────────────────────────────────────────

  /// Validate and insert an item; an existing url returns the existing row.
  fn add_item<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<Item, Self::Error>> + Send + 'a;

  fn get_item<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<Option<Item>, Self::Error>> + Send + 'a;

  fn list_items(&self) -> impl Future<Output = Result<Vec<Item>, Self::Error>> + Send + '_;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Look up the user for `ip`, creating one on first contact.
  ///
  /// A concurrent first contact from the same ip must resolve to the same
  /// user rather than surface a uniqueness error.
  fn get_or_create_user<'a>(
    &'a self,
    ip: &'a str,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + 'a;

  // ── Assignments ───────────────────────────────────────────────────────

  /// Pick two random items `user` has no recorded votes for. Read-only.
  fn select_pair<'a>(
    &'a self,
    user: &'a User,
  ) -> impl Future<Output = Result<Option<Pair>, Self::Error>> + Send + 'a;

  /// Persist `pair` as the user's active assignment, replacing any previous
  /// one.
  ///
  /// Returns `None` and writes nothing when either item already has a vote
  /// from `user`, which happens when the pair was selected from a snapshot
  /// older than a concurrent submit.
  fn assign<'a>(
    &'a self,
    user: &'a User,
    pair: &'a Pair,
  ) -> impl Future<Output = Result<Option<ActiveAssignment>, Self::Error>> + Send + 'a;

  /// The user's in-flight pair, if any. Read-only.
  fn current_assignment<'a>(
    &'a self,
    user: &'a User,
  ) -> impl Future<Output = Result<Option<ActiveAssignment>, Self::Error>> + Send + 'a;

  /// Select and assign a fresh pair. `None` leaves storage untouched.
  ///
  /// Not idempotent: each call replaces the previous unresolved pair.
  fn next_pair<'a>(
    &'a self,
    user: &'a User,
  ) -> impl Future<Output = Result<Option<Pair>, Self::Error>> + Send + 'a;

  // ── Votes ─────────────────────────────────────────────────────────────

  /// Resolve the user's active assignment in favour of `choice`.
  fn submit<'a>(
    &'a self,
    user: &'a User,
    choice: &'a str,
  ) -> impl Future<Output = Result<SubmitOutcome, Self::Error>> + Send + 'a;

  /// Score per item across all recorded votes.
  fn tally(&self) -> impl Future<Output = Result<Tally, Self::Error>> + Send + '_;

  /// Urls the user picked as winner, oldest first.
  fn my_votes<'a>(
    &'a self,
    user: &'a User,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  // ── Rate limiting ─────────────────────────────────────────────────────

  /// Record one request from `user` at `now` against `policy`.
  fn check_rate_limit<'a>(
    &'a self,
    user: &'a User,
    policy: RateLimitPolicy,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<RateLimitDecision, Self::Error>> + Send + 'a;
}
