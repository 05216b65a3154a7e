//! SQLite backend for the clipduel voting engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on dedicated
//! connection threads without blocking the async runtime. Connections are
//! split into a read pool sized to the host's parallelism and a write pool of
//! exactly one connection; the write pool is what serialises every mutation.

mod encode;
mod pool;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use pool::WriteStats;
pub use store::{SqliteStore, StoreOptions};

#[cfg(test)]
mod tests;
