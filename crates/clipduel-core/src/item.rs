//! Votable items, each identified by a unique url.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Urls longer than this are cut off before validation. Even clip links with
/// their query parameters stay well under it.
pub const MAX_URL_LEN: usize = 100;

/// Direct video and clip links are the only accepted item urls.
const ACCEPTED_PREFIXES: &[&str] = &[
  "https://youtube.com/watch?v=",
  "https://www.youtube.com/watch?v=",
  "https://youtube.com/clip/",
  "https://www.youtube.com/clip/",
  "https://youtu.be/",
];

/// A votable item. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
  pub id:  i64,
  pub url: String,
}

/// Trim and truncate `raw`, then check it is a direct video or clip link.
///
/// Returns the canonical url that is stored and compared against.
pub fn normalize_url(raw: &str) -> Result<String> {
  let url: String = raw.trim().chars().take(MAX_URL_LEN).collect();

  let accepted = ACCEPTED_PREFIXES
    .iter()
    .any(|prefix| url.len() > prefix.len() && url.starts_with(prefix));

  if accepted {
    Ok(url)
  } else {
    Err(Error::InvalidItemUrl(url))
  }
}
