//! # Stage: Aggregator
//!
//! ## Responsibility
//! Fold the most recent raw telemetry events into scored solution records:
//! normalize each error, group by (pattern, project), and upsert one
//! solution row per group. New groups get an auto-authored remediation
//! placeholder carrying the observed count and a raw sample for human
//! inspection.
//!
//! ## Guarantees
//! - Every persisted `error_pattern` is [`crate::normalize::normalize`] output
//! - `success_count` only ever increases here
//! - The whole run is one transaction: it commits fully or not at all
//! - Events are never marked consumed; re-running an overlapping window
//!   adds more count (sliding-window estimate, see DESIGN.md)
//!
//! ## NOT Responsible For
//! - Writing events (capture pipeline owns that table)
//! - Near-duplicate collapse across distinct patterns (see `similarity`)

use rusqlite::params;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::normalize::normalize;
use crate::store::{now_rfc3339, Store};

/// Default number of most recent events examined per run.
pub const DEFAULT_WINDOW: usize = 500;

/// How much raw text is kept as the human-inspection sample.
const SAMPLE_LEN: usize = 500;

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Events read from the window (after the non-empty-error filter).
    pub events_processed: usize,
    /// Distinct (pattern, project) groups upserted.
    pub patterns_upserted: usize,
}

#[derive(Debug)]
struct Group {
    count: u32,
    /// First `SAMPLE_LEN` chars of the first raw error seen for this group.
    sample: String,
}

/// Read the newest `window_limit` events carrying error text, normalize and
/// group them, and upsert each group into `solutions`.
pub fn aggregate(store: &mut Store, window_limit: usize) -> Result<AggregateSummary> {
    let tx = store.transaction()?;

    let events: Vec<(String, Option<String>)> = {
        let mut stmt = tx.prepare(
            "SELECT error, project FROM events
             WHERE error IS NOT NULL AND error != ''
             ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![window_limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    if events.is_empty() {
        tx.commit()?;
        return Ok(AggregateSummary { events_processed: 0, patterns_upserted: 0 });
    }

    // BTreeMap so upsert order is deterministic across runs.
    let mut groups: BTreeMap<(String, String), Group> = BTreeMap::new();
    for (error, project) in &events {
        let pattern = normalize(error);
        let key = (pattern, project.clone().unwrap_or_else(|| "unknown".to_string()));
        groups
            .entry(key)
            .or_insert_with(|| Group { count: 0, sample: truncate_chars(error, SAMPLE_LEN) })
            .count += 1;
    }

    let now = now_rfc3339();
    let mut upserted = 0usize;
    for ((pattern, project), group) in &groups {
        let placeholder = format!(
            "[auto] Observed {}x: {}",
            group.count,
            truncate_chars(&group.sample, 200)
        );
        tx.execute(
            "INSERT INTO solutions(error_pattern, project, solution, success_count, score, last_used)
             VALUES (?1, ?2, ?3, ?4, 1.0, ?5)
             ON CONFLICT(error_pattern, project) DO UPDATE SET
                 success_count = success_count + ?4,
                 last_used = ?5",
            params![pattern, project, placeholder, group.count, now],
        )?;
        upserted += 1;
    }

    tx.commit()?;

    let summary = AggregateSummary { events_processed: events.len(), patterns_upserted: upserted };
    tracing::info!(
        events = summary.events_processed,
        patterns = summary.patterns_upserted,
        "aggregation run complete"
    );
    Ok(summary)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}
