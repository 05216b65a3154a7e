//! Fail2ban-style request limiter.
//!
//! Requests that arrive faster than [`RateLimitPolicy::min_interval`] count
//! as failures; slower requests pay one failure back. Exceeding
//! `max_failures` bans the user for `ban_duration`. Counters are persisted
//! per user by the store; the arithmetic lives here.

use std::time::Duration;

/// Limiter settings. Disabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
  pub enabled:      bool,
  pub min_interval: Duration,
  pub max_failures: u32,
  pub ban_duration: Duration,
}

impl Default for RateLimitPolicy {
  fn default() -> Self {
    Self {
      enabled:      false,
      min_interval: Duration::from_secs(1),
      max_failures: 5,
      ban_duration: Duration::from_secs(20),
    }
  }
}

/// Persisted per-user counters. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitState {
  pub banned_until: i64,
  pub fail_count:   u32,
  pub last_request: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
  Allowed,
  Limited { reset_at_ms: i64 },
}

impl RateLimitPolicy {
  /// Apply one request at `now_ms` to `state`, returning the updated counters
  /// and whether the request may proceed.
  pub fn evaluate(
    &self,
    state:  RateLimitState,
    now_ms: i64,
  ) -> (RateLimitState, RateLimitDecision) {
    if state.banned_until > now_ms {
      return (state, RateLimitDecision::Limited { reset_at_ms: state.banned_until });
    }

    let min_interval = i64::try_from(self.min_interval.as_millis()).unwrap_or(i64::MAX);
    let too_fast     = now_ms.saturating_sub(state.last_request) < min_interval;

    let fail_count = if too_fast {
      state.fail_count.saturating_add(1)
    } else {
      state.fail_count.saturating_sub(1)
    };

    if fail_count > self.max_failures {
      let ban          = i64::try_from(self.ban_duration.as_millis()).unwrap_or(i64::MAX);
      let banned_until = now_ms.saturating_add(ban);
      let next = RateLimitState { banned_until, fail_count: 0, last_request: now_ms };
      return (next, RateLimitDecision::Limited { reset_at_ms: banned_until });
    }

    let next = RateLimitState { banned_until: state.banned_until, fail_count, last_request: now_ms };
    (next, RateLimitDecision::Allowed)
  }
}
