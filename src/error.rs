//! Crate-level error type.
//!
//! Per-row anomalies (a malformed timestamp on one row) are never errors —
//! they are typed skip outcomes counted in the run reports. `IntelError`
//! covers whole-run failures only: the store cannot be opened, configuration
//! is unusable, or a statement fails mid-batch (in which case the enclosing
//! transaction rolls back and no partial mutation is visible).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntelError {
    /// The SQLite store could not be opened or a statement failed.
    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Configuration could not be resolved (bad TOML, unusable path).
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IntelError>;
