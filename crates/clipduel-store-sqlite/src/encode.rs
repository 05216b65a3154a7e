//! Encoding helpers: domain types ↔ SQLite column values.
//!
//! Timestamps are stored as epoch milliseconds in `INTEGER` columns.

use chrono::{DateTime, Utc};
use clipduel_core::{
  item::Item,
  ratelimit::RateLimitState,
  user::User,
  vote::ActiveAssignment,
};

use crate::{Error, Result};

pub fn encode_ms(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_ms(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or(Error::Timestamp(ms))
}

pub fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
  Ok(Item { id: row.get(0)?, url: row.get(1)? })
}

pub fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
  Ok(User { id: row.get(0)?, ip: row.get(1)? })
}

pub fn rate_limit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RateLimitState> {
  Ok(RateLimitState {
    banned_until: row.get(0)?,
    fail_count:   row.get(1)?,
    last_request: row.get(2)?,
  })
}

// ─── Raw row types ───────────────────────────────────────────────────────────

/// `active_assignments` row before timestamp decoding.
pub struct RawAssignment {
  pub user_id:    i64,
  pub start_time: i64,
  pub item_a:     String,
  pub item_b:     String,
}

impl RawAssignment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:    row.get(0)?,
      start_time: row.get(1)?,
      item_a:     row.get(2)?,
      item_b:     row.get(3)?,
    })
  }

  pub fn into_assignment(self) -> Result<ActiveAssignment> {
    Ok(ActiveAssignment {
      user_id:    self.user_id,
      start_time: decode_ms(self.start_time)?,
      item_a:     self.item_a,
      item_b:     self.item_b,
    })
  }
}
