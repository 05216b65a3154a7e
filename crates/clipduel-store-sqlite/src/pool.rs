//! Fixed-size pools of [`tokio_rusqlite::Connection`] handles.
//!
//! A pool hands out at most `size` connections at once, gated by a
//! [`Semaphore`] with one permit per connection. The write pool is built with
//! a single connection, which is what serialises every mutation in the store.
//!
//! Closing a pool first waits (bounded) for outstanding guards to come back,
//! then closes the semaphore so every later `acquire` fails immediately.

use std::{
  ops::Deref,
  path::Path,
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Per-connection settings applied when a pool is opened.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolConfig {
  pub size:            usize,
  pub busy_timeout:    Duration,
  pub acquire_timeout: Duration,
  /// Reject mutating statements on this pool's connections.
  pub query_only:      bool,
}

/// Concurrency counters for the write path.
///
/// The counters track checked-out guards, not SQLite execution. If the
/// caller's future is dropped mid-write (a request timeout, say), the guard
/// is released while the closure keeps running on the connection thread, so
/// `in_flight` reads low until that closure finishes. Execution itself stays
/// serialised because the connection thread runs one closure at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
  /// Write guards currently checked out.
  pub in_flight: usize,
  /// Highest number of simultaneously checked-out write guards observed.
  pub peak:      usize,
}

pub(crate) struct Pool {
  name:            &'static str,
  size:            usize,
  acquire_timeout: Duration,
  permits:         Semaphore,
  /// Idle connections. Only touched for push/pop, never held across an await.
  idle:            Mutex<Vec<Connection>>,
  in_flight:       AtomicUsize,
  peak:            AtomicUsize,
}

impl Pool {
  pub async fn open(name: &'static str, path: &Path, config: PoolConfig) -> Result<Self> {
    let size      = config.size.max(1);
    let mut conns = Vec::with_capacity(size);

    for _ in 0..size {
      let conn = Connection::open(path.to_path_buf()).await?;
      conn
        .call(move |conn| {
          configure_connection(conn, config.busy_timeout, config.query_only)?;
          Ok(())
        })
        .await?;
      conns.push(conn);
    }

    debug!(pool = name, size, "opened connection pool");

    Ok(Self {
      name,
      size,
      acquire_timeout: config.acquire_timeout,
      permits:         Semaphore::new(size),
      idle:            Mutex::new(conns),
      in_flight:       AtomicUsize::new(0),
      peak:            AtomicUsize::new(0),
    })
  }

  pub fn size(&self) -> usize { self.size }

  pub fn is_closed(&self) -> bool { self.permits.is_closed() }

  pub fn stats(&self) -> WriteStats {
    WriteStats {
      in_flight: self.in_flight.load(Ordering::SeqCst),
      peak:      self.peak.load(Ordering::SeqCst),
    }
  }

  /// Check out a connection, waiting at most `acquire_timeout` for one to be
  /// returned.
  pub async fn acquire(&self) -> Result<PooledConn<'_>> {
    let permit = match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
      Ok(Ok(permit)) => permit,
      Ok(Err(_))     => return Err(Error::Closed),
      Err(_)         => {
        return Err(Error::PoolTimeout { pool: self.name, waited: self.acquire_timeout });
      }
    };

    let conn = self
      .idle
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .pop()
      .ok_or(Error::Closed)?;

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    Ok(PooledConn { pool: self, conn, _permit: permit })
  }

  /// Wait up to `grace` for checked-out connections to return, then refuse
  /// new acquirers and close every idle connection.
  pub async fn close(&self, grace: Duration) {
    if self.is_closed() {
      return;
    }

    // Waiters queue behind this acquisition, so nothing new starts while we
    // drain.
    let permits = u32::try_from(self.size).unwrap_or(u32::MAX);
    match tokio::time::timeout(grace, self.permits.acquire_many(permits)).await {
      Ok(Ok(drained)) => drained.forget(),
      Ok(Err(_))      => return,
      Err(_)          => {
        warn!(pool = self.name, ?grace, in_flight = self.stats().in_flight, "drain timed out; closing anyway");
      }
    }
    self.permits.close();

    let conns: Vec<Connection> =
      std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
    for conn in conns {
      if let Err(e) = conn.close().await {
        warn!(pool = self.name, error = %e, "failed to close connection");
      }
    }

    debug!(pool = self.name, "closed connection pool");
  }
}

/// A checked-out connection. Returned to the pool on drop.
pub(crate) struct PooledConn<'a> {
  pool:    &'a Pool,
  conn:    Connection,
  _permit: SemaphorePermit<'a>,
}

impl Deref for PooledConn<'_> {
  type Target = Connection;

  fn deref(&self) -> &Connection { &self.conn }
}

impl Drop for PooledConn<'_> {
  fn drop(&mut self) {
    // Handles are cheap clones of the same connection thread.
    self.pool.idle.lock().unwrap_or_else(PoisonError::into_inner).push(self.conn.clone());
    self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
    // `_permit` is released after this body, once the connection is back.
  }
}

fn configure_connection(
  conn:         &rusqlite::Connection,
  busy_timeout: Duration,
  query_only:   bool,
) -> rusqlite::Result<()> {
  conn.busy_timeout(busy_timeout)?;
  conn.pragma_update(None, "foreign_keys", "ON")?;
  conn.pragma_update(None, "synchronous", "NORMAL")?;
  let _journal_mode: String =
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
  if query_only {
    conn.pragma_update(None, "query_only", "ON")?;
  }
  Ok(())
}
