//! Database location resolution.
//!
//! The store handle is injected into every operation; nothing in this crate
//! holds a process-wide database path. Resolution order, first match wins:
//!
//! 1. `--db PATH` flag
//! 2. `DEV_INTEL_DB` environment variable
//! 3. `db_path` in `~/.dev-intel/config.toml`
//! 4. `~/.dev-intel/dev.db`

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{IntelError, Result};

/// On-disk configuration file (`~/.dev-intel/config.toml`). All fields
/// optional; an absent file is not an error.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
}

impl FileConfig {
    /// Parse a TOML string. Unknown keys are ignored.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| IntelError::Config(e.to_string()))
    }
}

/// Directory holding the default database and config file.
fn config_dir() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".dev-intel")
}

/// Resolve the database path from flag > env > config file > default.
pub fn resolve_db_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = flag {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = env::var("DEV_INTEL_DB") {
        if !p.is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let dir = config_dir();
    let config_file = dir.join("config.toml");
    if config_file.is_file() {
        let text = std::fs::read_to_string(&config_file)?;
        if let Some(p) = FileConfig::from_toml(&text)?.db_path {
            return Ok(p);
        }
    }
    Ok(dir.join("dev.db"))
}
