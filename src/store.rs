//! # Stage: Store
//!
//! ## Responsibility
//! Own the SQLite connection and bootstrap the schema. Every batch
//! operation (aggregate, decay, similarity merge, promote) receives a
//! `Store` by reference — there is no process-wide handle or well-known
//! path baked into the engines.
//!
//! ## Guarantees
//! - Schema bootstrap is idempotent (`CREATE TABLE IF NOT EXISTS`)
//! - The connection is released when the `Store` drops, on every exit path
//! - Each logical operation runs inside a single transaction obtained from
//!   [`Store::transaction`]; a failed run commits nothing
//!
//! ## NOT Responsible For
//! - Writing `events` rows (owned by the capture pipeline; read-only here)
//! - Cross-process locking beyond what SQLite itself provides

use rusqlite::{Connection, Transaction};
use std::path::Path;

use crate::error::Result;

/// Idempotent schema for the knowledge base. `events` is owned by the
/// capture pipeline; `test_sessions`, `dev_sessions` and `questions` are
/// owned by collaborator subsystems but share the decay/archive mechanics,
/// so their tables are bootstrapped here too.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id       INTEGER PRIMARY KEY,
    ts       TEXT,
    error    TEXT,
    project  TEXT,
    resolved INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS solutions (
    id            INTEGER PRIMARY KEY,
    error_pattern TEXT NOT NULL,
    project       TEXT NOT NULL DEFAULT 'unknown',
    solution      TEXT,
    success_count INTEGER NOT NULL DEFAULT 0,
    score         REAL NOT NULL DEFAULT 1.0,
    last_used     TEXT,
    UNIQUE(error_pattern, project)
);

CREATE TABLE IF NOT EXISTS patterns (
    id                 INTEGER PRIMARY KEY,
    pattern            TEXT NOT NULL UNIQUE,
    description        TEXT,
    solution           TEXT,
    frequency          INTEGER NOT NULL DEFAULT 0,
    score              REAL NOT NULL DEFAULT 1.0,
    promoted_to_memory INTEGER NOT NULL DEFAULT 0,
    last_seen          TEXT
);

CREATE TABLE IF NOT EXISTS feedback (
    id                 INTEGER PRIMARY KEY,
    category           TEXT NOT NULL,
    wrong_approach     TEXT NOT NULL,
    correct_approach   TEXT NOT NULL,
    project            TEXT,
    scope              TEXT,
    confirmation_count INTEGER NOT NULL DEFAULT 0,
    score              REAL NOT NULL DEFAULT 1.0,
    status             TEXT NOT NULL DEFAULT 'open',
    last_seen          TEXT
);

CREATE TABLE IF NOT EXISTS test_sessions (
    id    INTEGER PRIMARY KEY,
    score REAL NOT NULL DEFAULT 1.0,
    ts    TEXT
);

CREATE TABLE IF NOT EXISTS dev_sessions (
    id    INTEGER PRIMARY KEY,
    score REAL NOT NULL DEFAULT 1.0,
    ts    TEXT
);

CREATE TABLE IF NOT EXISTS questions (
    id        INTEGER PRIMARY KEY,
    question  TEXT,
    score     REAL NOT NULL DEFAULT 1.0,
    status    TEXT NOT NULL DEFAULT 'open',
    last_seen TEXT
);
";

/// Injected SQLite handle for one batch run.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bootstrap the
    /// schema. The parent directory is created if absent.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// Shared access for read-only operations.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin the single transaction wrapping one logical batch operation.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

/// Current UTC time as an RFC 3339 string — the canonical timestamp format
/// for every column this crate writes.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
