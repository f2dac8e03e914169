//! # Stage: Promotion Engine
//!
//! ## Responsibility
//! Elevate stable feedback into first-class patterns. A feedback row is
//! stable once `score * confirmation_count` reaches the stability threshold;
//! promotion synthesizes a pattern row from it with a boosted starting
//! score. The feedback row itself is left in place and keeps decaying.
//!
//! ## Guarantees
//! - Idempotent: a feedback row whose synthesized pattern name already
//!   exists is skipped, so re-running promotes nothing twice
//! - The whole run is one transaction
//! - Only actually inserted rows are counted
//!
//! ## NOT Responsible For
//! - Writing feedback rows or confirmation counts (capture pipeline)
//! - Pushing promoted patterns anywhere else (`promoted_to_memory` stays 0
//!   until an external consumer claims the row)

use rusqlite::params;

use crate::error::Result;
use crate::store::{now_rfc3339, Store};

/// Minimum `score * confirmation_count` for a feedback row to promote.
pub const STABILITY_THRESHOLD: f64 = 4.0;

/// Starting-score multiplier applied to the feedback score on promotion.
const PROMOTION_BOOST: f64 = 1.5;

#[derive(Debug)]
struct Candidate {
    category: String,
    wrong_approach: String,
    correct_approach: String,
    scope: Option<String>,
    score: f64,
    confirmation_count: i64,
}

/// Promote every stable feedback row into `patterns`. Returns how many
/// pattern rows were actually inserted.
pub fn promote_feedback(store: &mut Store) -> Result<usize> {
    let tx = store.transaction()?;

    let candidates: Vec<Candidate> = {
        let mut stmt = tx.prepare(
            "SELECT category, wrong_approach, correct_approach, scope, score, confirmation_count
             FROM feedback
             WHERE score * confirmation_count >= ?1",
        )?;
        let mapped = stmt.query_map(params![STABILITY_THRESHOLD], |row| {
            Ok(Candidate {
                category: row.get(0)?,
                wrong_approach: row.get(1)?,
                correct_approach: row.get(2)?,
                scope: row.get(3)?,
                score: row.get(4)?,
                confirmation_count: row.get(5)?,
            })
        })?;
        mapped.collect::<std::result::Result<_, _>>()?
    };

    let now = now_rfc3339();
    let mut promoted = 0usize;
    for c in &candidates {
        let pattern = format!(
            "[{}] {} → {}",
            c.category, c.wrong_approach, c.correct_approach
        );
        let scope = c.scope.as_deref().unwrap_or("general");
        let description = format!("User feedback ({scope}): avoid {}", c.wrong_approach);
        let inserted = tx.execute(
            "INSERT INTO patterns(pattern, description, solution, frequency, score, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(pattern) DO NOTHING",
            params![
                pattern,
                description,
                c.correct_approach,
                c.confirmation_count,
                c.score * PROMOTION_BOOST,
                now
            ],
        )?;
        promoted += inserted;
    }

    tx.commit()?;
    tracing::info!(
        candidates = candidates.len(),
        promoted,
        "feedback promotion complete"
    );
    Ok(promoted)
}
