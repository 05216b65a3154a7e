//! [`Ballot`] — the service object request handlers talk to.
//!
//! Constructed once at startup around a shared store, the voting deadline and
//! the rate-limit policy, then cloned into every handler. [`Ballot::shutdown`]
//! is the matching single teardown.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
  Error, Result,
  ratelimit::{RateLimitDecision, RateLimitPolicy},
  store::BallotStore,
  user::User,
  vote::{Pair, SubmitOutcome, Tally},
};

pub struct Ballot<S> {
  store:      Arc<S>,
  deadline:   DateTime<Utc>,
  rate_limit: RateLimitPolicy,
}

impl<S> Clone for Ballot<S> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      deadline:   self.deadline,
      rate_limit: self.rate_limit,
    }
  }
}

impl<S: BallotStore> Ballot<S> {
  pub fn new(store: Arc<S>, deadline: DateTime<Utc>, rate_limit: RateLimitPolicy) -> Self {
    Self { store, deadline, rate_limit }
  }

  pub fn deadline(&self) -> DateTime<Utc> { self.deadline }

  /// The deadline as epoch milliseconds, as reported to clients.
  pub fn deadline_ms(&self) -> i64 { self.deadline.timestamp_millis() }

  pub fn is_open_at(&self, now: DateTime<Utc>) -> bool { now <= self.deadline }

  /// Fail with [`Error::VotingClosed`] once the deadline has passed.
  pub fn ensure_open(&self) -> Result<()> {
    if self.is_open_at(Utc::now()) {
      Ok(())
    } else {
      Err(Error::VotingClosed)
    }
  }

  /// Resolve `ip` to a user, creating it on first contact.
  pub async fn identify(&self, ip: &str) -> Result<User> {
    self.store.get_or_create_user(ip).await.map_err(|e| {
      error!(ip, op = "identify", error = %e, "storage failure");
      Error::store(e)
    })
  }

  /// Offer `user` a fresh pair, or `None` once fewer than two unseen items
  /// remain.
  pub async fn next_pair(&self, user: &User) -> Result<Option<Pair>> {
    self.ensure_open()?;
    self.guard(user, "next_pair").await?;

    let pair = self
      .store
      .next_pair(user)
      .await
      .map_err(|e| self.storage_failure(user, "next_pair", e))?;

    match &pair {
      Some(p) => debug!(user_id = user.id, a = %p.a, b = %p.b, "assigned pair"),
      None    => debug!(user_id = user.id, "no unseen pair remaining"),
    }
    Ok(pair)
  }

  /// Resolve the user's active pair in favour of `choice`.
  ///
  /// Having no active pair is a silent no-op. A choice outside the offered
  /// pair is [`Error::InvalidChoice`].
  pub async fn submit(&self, user: &User, choice: &str) -> Result<SubmitOutcome> {
    self.ensure_open()?;
    self.guard(user, "submit").await?;

    if choice.is_empty() {
      return Err(Error::EmptyChoice);
    }

    let outcome = self
      .store
      .submit(user, choice)
      .await
      .map_err(|e| self.storage_failure(user, "submit", e))?;

    match &outcome {
      SubmitOutcome::Recorded { winner, loser } => {
        info!(user_id = user.id, %winner, %loser, "vote recorded");
      }
      SubmitOutcome::NoAssignment => {
        debug!(user_id = user.id, "submit without active assignment ignored");
      }
      SubmitOutcome::InvalidChoice => {
        warn!(user_id = user.id, choice, "choice not among offered pair");
        return Err(Error::InvalidChoice(choice.to_owned()));
      }
    }
    Ok(outcome)
  }

  pub async fn totals(&self) -> Result<Tally> {
    self.store.tally().await.map_err(|e| {
      error!(op = "tally", error = %e, "storage failure");
      Error::store(e)
    })
  }

  pub async fn my_votes(&self, user: &User) -> Result<Vec<String>> {
    self
      .store
      .my_votes(user)
      .await
      .map_err(|e| self.storage_failure(user, "my_votes", e))
  }

  /// Close the store, allowing in-flight writes up to `grace` to finish.
  pub async fn shutdown(&self, grace: Duration) -> Result<()> {
    info!(?grace, "shutting down ballot store");
    self.store.close(grace).await.map_err(Error::store)
  }

  async fn guard(&self, user: &User, op: &'static str) -> Result<()> {
    if !self.rate_limit.enabled {
      return Ok(());
    }
    let decision = self
      .store
      .check_rate_limit(user, self.rate_limit, Utc::now())
      .await
      .map_err(|e| self.storage_failure(user, op, e))?;

    match decision {
      RateLimitDecision::Allowed => Ok(()),
      RateLimitDecision::Limited { reset_at_ms } => {
        warn!(user_id = user.id, op, reset_at_ms, "rate limited");
        Err(Error::RateLimited { reset_at_ms })
      }
    }
  }

  fn storage_failure(&self, user: &User, op: &'static str, e: S::Error) -> Error {
    error!(user_id = user.id, op, error = %e, "storage failure");
    Error::store(e)
  }
}
