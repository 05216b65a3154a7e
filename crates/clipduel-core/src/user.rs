//! An anonymous voter identified by client IP.

use serde::{Deserialize, Serialize};

/// A voter. Created lazily on first contact and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub ip: String,
}
