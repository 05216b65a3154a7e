//! Pairs, active assignments, and vote outcomes.
//!
//! A user holds at most one [`ActiveAssignment`] at a time. Resolving it
//! writes two append-only vote rows (winner scores 1, loser scores 0); the
//! per-item [`Tally`] is derived from those rows on read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two distinct items offered together for a head-to-head choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
  pub a: String,
  pub b: String,
}

impl Pair {
  pub fn contains(&self, url: &str) -> bool { self.a == url || self.b == url }
}

/// The single outstanding pair offered to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAssignment {
  pub user_id:    i64,
  pub start_time: DateTime<Utc>,
  pub item_a:     String,
  pub item_b:     String,
}

impl ActiveAssignment {
  pub fn pair(&self) -> Pair {
    Pair { a: self.item_a.clone(), b: self.item_b.clone() }
  }

  /// The item that loses if `choice` wins, or `None` when `choice` is not
  /// one of the offered items.
  pub fn loser_for(&self, choice: &str) -> Option<&str> {
    if choice == self.item_a {
      Some(&self.item_b)
    } else if choice == self.item_b {
      Some(&self.item_a)
    } else {
      None
    }
  }
}

/// Result of submitting a choice against the user's active assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Both vote rows were written and the assignment cleared.
  Recorded { winner: String, loser: String },
  /// The user had nothing to resolve; nothing changed.
  NoAssignment,
  /// The choice matched neither offered item; nothing changed.
  InvalidChoice,
}

/// Total score per item url. Every known item is present, even at zero.
pub type Tally = BTreeMap<String, i64>;
