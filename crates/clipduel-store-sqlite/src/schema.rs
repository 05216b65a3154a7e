//! SQL schema for the clipduel SQLite store.
//!
//! Executed by `setup` inside the write transaction. Connection-level pragmas
//! (journal mode, busy timeout) are applied per connection by the pool.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    id          INTEGER PRIMARY KEY,
    url         TEXT UNIQUE NOT NULL,
    created_at  INTEGER NOT NULL         -- epoch ms
);

CREATE TABLE IF NOT EXISTS users (
    id                      INTEGER PRIMARY KEY,
    ip                      TEXT UNIQUE NOT NULL,
    ratelimit_until         INTEGER NOT NULL DEFAULT 0,   -- epoch ms
    ratelimit_failcount     INTEGER NOT NULL DEFAULT 0,
    ratelimit_last_request  INTEGER NOT NULL DEFAULT 0    -- epoch ms
);

-- At most one outstanding pair per user; replaced on every new assignment.
CREATE TABLE IF NOT EXISTS active_assignments (
    user_id     INTEGER PRIMARY KEY REFERENCES users(id),
    start_time  INTEGER NOT NULL,        -- epoch ms
    item_a      TEXT NOT NULL,
    item_b      TEXT NOT NULL
);

-- Votes are strictly append-only.
-- Each resolved pair writes one winning (1) and one losing (0) row.
CREATE TABLE IF NOT EXISTS votes (
    id        INTEGER PRIMARY KEY,
    user_id   INTEGER NOT NULL REFERENCES users(id),
    item_url  TEXT NOT NULL REFERENCES items(url),
    score     INTEGER NOT NULL CHECK (score IN (0, 1))
);

CREATE INDEX IF NOT EXISTS votes_user_idx ON votes(user_id, item_url);
CREATE INDEX IF NOT EXISTS votes_item_idx ON votes(item_url);

PRAGMA user_version = 1;
";

/// Value stamped into `PRAGMA user_version` by [`SCHEMA`].
pub const SCHEMA_VERSION: i64 = 1;
