//! [`SqliteStore`] — the SQLite implementation of [`BallotStore`].

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  thread,
  time::Duration,
};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::{debug, info, warn};

use clipduel_core::{
  item::{Item, normalize_url},
  ratelimit::{RateLimitDecision, RateLimitPolicy},
  store::BallotStore,
  user::User,
  vote::{ActiveAssignment, Pair, SubmitOutcome, Tally},
};

use crate::{
  Error, Result,
  encode::{RawAssignment, encode_ms, item_from_row, rate_limit_from_row, user_from_row},
  pool::{Pool, PoolConfig, WriteStats},
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Options ─────────────────────────────────────────────────────────────────

/// Knobs honoured when the store is opened.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
  /// Read connections; defaults to the host's available parallelism.
  pub read_pool_size:  Option<usize>,
  /// How long SQLite itself retries a locked database before failing.
  pub busy_timeout:    Duration,
  /// How long a caller waits for a free pooled connection.
  pub acquire_timeout: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      read_pool_size:  None,
      busy_timeout:    Duration::from_secs(5),
      acquire_timeout: Duration::from_secs(5),
    }
  }
}

impl StoreOptions {
  fn read_pool_size(&self) -> usize {
    self
      .read_pool_size
      .unwrap_or_else(|| thread::available_parallelism().map_or(1, usize::from))
  }
}

/// Select/assign rounds `next_pair` makes when concurrent submits keep
/// invalidating the selected pair.
const MAX_PAIR_ATTEMPTS: u32 = 3;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A clipduel store backed by a single SQLite file.
///
/// Reads go through a pool of parallel connections; every mutation goes
/// through a pool holding exactly one connection. Cloning is cheap; both
/// pools are reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  read:  Arc<Pool>,
  write: Arc<Pool>,
  path:  Arc<PathBuf>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and create the schema.
  pub async fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }

    // The writer opens first so it is the connection that switches the file
    // to WAL.
    let write = Pool::open("write", &path, PoolConfig {
      size:            1,
      busy_timeout:    options.busy_timeout,
      acquire_timeout: options.acquire_timeout,
      query_only:      false,
    })
    .await?;

    let read = Pool::open("read", &path, PoolConfig {
      size:            options.read_pool_size(),
      busy_timeout:    options.busy_timeout,
      acquire_timeout: options.acquire_timeout,
      query_only:      true,
    })
    .await?;

    let store = Self { read: Arc::new(read), write: Arc::new(write), path: Arc::new(path) };
    store.setup(&[]).await?;

    info!(
      path = %store.path.display(),
      readers = store.read.size(),
      "opened sqlite store"
    );
    Ok(store)
  }

  pub fn is_closed(&self) -> bool { self.write.is_closed() }

  /// In-flight and peak concurrent write operations since open.
  pub fn write_stats(&self) -> WriteStats { self.write.stats() }

  /// Run `f` on a connection from the read pool.
  pub(crate) async fn read<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let conn = self.read.acquire().await?;
    Ok(conn.call(f).await?)
  }

  /// Run `f` on the single write connection.
  pub(crate) async fn write<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let conn = self.write.acquire().await?;
    Ok(conn.call(f).await?)
  }

  async fn find_user(&self, ip: &str) -> Result<Option<User>> {
    let ip = ip.to_owned();
    self
      .read(move |conn| {
        Ok(
          conn
            .query_row("SELECT id, ip FROM users WHERE ip = ?1", rusqlite::params![ip], user_from_row)
            .optional()?,
        )
      })
      .await
  }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

/// Whether `user_id` has a recorded vote on either item.
fn has_voted_on(
  tx:      &rusqlite::Transaction<'_>,
  user_id: i64,
  item_a:  &str,
  item_b:  &str,
) -> rusqlite::Result<bool> {
  tx.query_row(
    "SELECT EXISTS (
       SELECT 1 FROM votes WHERE user_id = ?1 AND item_url IN (?2, ?3)
     )",
    rusqlite::params![user_id, item_a, item_b],
    |row| row.get(0),
  )
}

/// Delete the user's assignment and write both vote rows, all inside `tx`.
///
/// The assignment is re-read inside the transaction, so a pair replaced or
/// resolved since the caller's lookup is judged against what is current now.
fn resolve_assignment(
  tx:      &rusqlite::Transaction<'_>,
  user_id: i64,
  choice:  &str,
) -> rusqlite::Result<SubmitOutcome> {
  let current: Option<(String, String)> = tx
    .query_row(
      "SELECT item_a, item_b FROM active_assignments WHERE user_id = ?1",
      rusqlite::params![user_id],
      |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?;

  let Some((item_a, item_b)) = current else {
    return Ok(SubmitOutcome::NoAssignment);
  };

  // A pair that already carries this user's votes was resolved before it
  // was (re)assigned. Drop it instead of scoring it twice.
  if has_voted_on(tx, user_id, &item_a, &item_b)? {
    tx.execute("DELETE FROM active_assignments WHERE user_id = ?1", rusqlite::params![user_id])?;
    return Ok(SubmitOutcome::NoAssignment);
  }

  let loser = if choice == item_a {
    item_b
  } else if choice == item_b {
    item_a
  } else {
    return Ok(SubmitOutcome::InvalidChoice);
  };

  tx.execute("DELETE FROM active_assignments WHERE user_id = ?1", rusqlite::params![user_id])?;
  tx.execute(
    "INSERT INTO votes (user_id, item_url, score) VALUES (?1, ?2, 1)",
    rusqlite::params![user_id, choice],
  )?;
  tx.execute(
    "INSERT INTO votes (user_id, item_url, score) VALUES (?1, ?2, 0)",
    rusqlite::params![user_id, loser],
  )?;

  Ok(SubmitOutcome::Recorded { winner: choice.to_owned(), loser })
}

// ─── BallotStore impl ────────────────────────────────────────────────────────

impl BallotStore for SqliteStore {
  type Error = Error;

  // ── Setup & lifecycle ─────────────────────────────────────────────────────

  async fn setup(&self, seed: &[String]) -> Result<usize> {
    let urls: Vec<String> = seed
      .iter()
      .filter_map(|raw| match normalize_url(raw) {
        Ok(url) => Some(url),
        Err(e)  => {
          warn!(error = %e, "skipping seed item");
          None
        }
      })
      .collect();
    let now = encode_ms(Utc::now());

    let (inserted, previous_version) = self
      .write(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous_version: i64 = tx.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        tx.execute_batch(SCHEMA)?;
        let mut inserted = 0;
        for url in &urls {
          inserted += tx.execute(
            "INSERT OR IGNORE INTO items (url, created_at) VALUES (?1, ?2)",
            rusqlite::params![url, now],
          )?;
        }
        tx.commit()?;
        Ok((inserted, previous_version))
      })
      .await?;

    if previous_version != SCHEMA_VERSION {
      info!(from = previous_version, to = SCHEMA_VERSION, "initialised schema");
    }
    if inserted > 0 {
      info!(inserted, "seeded items");
    }
    Ok(inserted)
  }

  async fn close(&self, grace: Duration) -> Result<()> {
    if self.is_closed() {
      return Ok(());
    }
    info!(path = %self.path.display(), "closing sqlite store");
    self.write.close(grace).await;
    self.read.close(grace).await;
    Ok(())
  }

  // ── Items ─────────────────────────────────────────────────────────────────

  async fn add_item(&self, url: &str) -> Result<Item> {
    let url = normalize_url(url)?;
    let now = encode_ms(Utc::now());

    let item = self
      .write(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "INSERT OR IGNORE INTO items (url, created_at) VALUES (?1, ?2)",
          rusqlite::params![url, now],
        )?;
        let item = tx.query_row(
          "SELECT id, url FROM items WHERE url = ?1",
          rusqlite::params![url],
          item_from_row,
        )?;
        tx.commit()?;
        Ok(item)
      })
      .await?;

    debug!(id = item.id, url = %item.url, "item added");
    Ok(item)
  }

  async fn get_item(&self, url: &str) -> Result<Option<Item>> {
    let Ok(url) = normalize_url(url) else {
      return Ok(None);
    };
    self
      .read(move |conn| {
        Ok(
          conn
            .query_row("SELECT id, url FROM items WHERE url = ?1", rusqlite::params![url], item_from_row)
            .optional()?,
        )
      })
      .await
  }

  async fn list_items(&self) -> Result<Vec<Item>> {
    self
      .read(|conn| {
        let mut stmt = conn.prepare("SELECT id, url FROM items ORDER BY id")?;
        let rows = stmt
          .query_map([], item_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn get_or_create_user(&self, ip: &str) -> Result<User> {
    if let Some(user) = self.find_user(ip).await? {
      return Ok(user);
    }

    let ip_owned = ip.to_owned();
    let inserted: Option<i64> = self
      .write(move |conn| {
        match conn.execute("INSERT INTO users (ip) VALUES (?1)", rusqlite::params![ip_owned]) {
          Ok(_) => Ok(Some(conn.last_insert_rowid())),
          // Another request created this user between our read and write.
          Err(e) if is_unique_violation(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match inserted {
      Some(id) => {
        debug!(user_id = id, ip, "user created");
        Ok(User { id, ip: ip.to_owned() })
      }
      None => {
        debug!(ip, "user created concurrently; re-reading");
        self
          .find_user(ip)
          .await?
          .ok_or_else(|| Error::UserVanished(ip.to_owned()))
      }
    }
  }

  // ── Assignments ───────────────────────────────────────────────────────────

  async fn select_pair(&self, user: &User) -> Result<Option<Pair>> {
    let user_id = user.id;
    let urls: Vec<String> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT url FROM items
           WHERE url NOT IN (SELECT item_url FROM votes WHERE user_id = ?1)
           ORDER BY random()
           LIMIT 2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut urls = urls.into_iter();
    match (urls.next(), urls.next()) {
      (Some(a), Some(b)) => Ok(Some(Pair { a, b })),
      _ => Ok(None),
    }
  }

  async fn assign(&self, user: &User, pair: &Pair) -> Result<Option<ActiveAssignment>> {
    let assignment = ActiveAssignment {
      user_id:    user.id,
      start_time: Utc::now(),
      item_a:     pair.a.clone(),
      item_b:     pair.b.clone(),
    };

    let user_id = assignment.user_id;
    let start   = encode_ms(assignment.start_time);
    let item_a  = assignment.item_a.clone();
    let item_b  = assignment.item_b.clone();

    let stored = self
      .write(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if has_voted_on(&tx, user_id, &item_a, &item_b)? {
          return Ok(false);
        }
        tx.execute(
          "INSERT INTO active_assignments (user_id, start_time, item_a, item_b)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (user_id) DO UPDATE SET
             start_time = excluded.start_time,
             item_a     = excluded.item_a,
             item_b     = excluded.item_b",
          rusqlite::params![user_id, start, item_a, item_b],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(stored.then_some(assignment))
  }

  async fn current_assignment(&self, user: &User) -> Result<Option<ActiveAssignment>> {
    let user_id = user.id;
    let raw: Option<RawAssignment> = self
      .read(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, start_time, item_a, item_b
               FROM active_assignments WHERE user_id = ?1",
              rusqlite::params![user_id],
              RawAssignment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAssignment::into_assignment).transpose()
  }

  async fn next_pair(&self, user: &User) -> Result<Option<Pair>> {
    for attempt in 1..=MAX_PAIR_ATTEMPTS {
      let Some(pair) = self.select_pair(user).await? else {
        return Ok(None);
      };
      if self.assign(user, &pair).await?.is_some() {
        return Ok(Some(pair));
      }
      debug!(user_id = user.id, attempt, "selected pair went stale; reselecting");
    }
    warn!(user_id = user.id, attempts = MAX_PAIR_ATTEMPTS, "no fresh pair after retries");
    Ok(None)
  }

  // ── Votes ─────────────────────────────────────────────────────────────────

  async fn submit(&self, user: &User, choice: &str) -> Result<SubmitOutcome> {
    // Cheap read-side rejection before queueing on the writer.
    let Some(active) = self.current_assignment(user).await? else {
      return Ok(SubmitOutcome::NoAssignment);
    };
    if active.loser_for(choice).is_none() {
      return Ok(SubmitOutcome::InvalidChoice);
    }

    let user_id = user.id;
    let choice  = choice.to_owned();
    self
      .write(move |conn| {
        let tx      = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = resolve_assignment(&tx, user_id, &choice)?;
        if outcome != SubmitOutcome::InvalidChoice {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await
  }

  async fn tally(&self) -> Result<Tally> {
    self
      .read(|conn| {
        // One read transaction so both queries see the same snapshot.
        let tx = conn.transaction()?;
        let mut tally = Tally::new();

        {
          let mut stmt = tx.prepare("SELECT url FROM items")?;
          let urls = stmt.query_map([], |row| row.get::<_, String>(0))?;
          for url in urls {
            tally.insert(url?, 0);
          }
        }

        {
          let mut stmt =
            tx.prepare("SELECT item_url, SUM(score) FROM votes GROUP BY item_url")?;
          let sums = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
          for sum in sums {
            let (url, score) = sum?;
            *tally.entry(url).or_insert(0) += score;
          }
        }

        tx.finish()?;
        Ok(tally)
      })
      .await
  }

  async fn my_votes(&self, user: &User) -> Result<Vec<String>> {
    let user_id = user.id;
    self
      .read(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_url FROM votes WHERE user_id = ?1 AND score = 1 ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
  }

  // ── Rate limiting ─────────────────────────────────────────────────────────

  async fn check_rate_limit(
    &self,
    user:   &User,
    policy: RateLimitPolicy,
    now:    chrono::DateTime<Utc>,
  ) -> Result<RateLimitDecision> {
    let user_id = user.id;
    let now_ms  = encode_ms(now);

    self
      .write(move |conn| {
        let tx    = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let state = tx.query_row(
          "SELECT ratelimit_until, ratelimit_failcount, ratelimit_last_request
           FROM users WHERE id = ?1",
          rusqlite::params![user_id],
          rate_limit_from_row,
        )?;

        let (next, decision) = policy.evaluate(state, now_ms);
        if next != state {
          tx.execute(
            "UPDATE users SET
               ratelimit_until        = ?2,
               ratelimit_failcount    = ?3,
               ratelimit_last_request = ?4
             WHERE id = ?1",
            rusqlite::params![user_id, next.banned_until, next.fail_count, next.last_request],
          )?;
        }
        tx.commit()?;
        Ok(decision)
      })
      .await
  }
}
