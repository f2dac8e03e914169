//! # Stage: Decay Engine
//!
//! ## Responsibility
//! Periodically attenuate every score in the knowledge base by exponential
//! time decay, then sweep out rows whose score has fallen below the archive
//! threshold. Each scored table has its own half-life; the threshold is a
//! single global constant.
//!
//! ## Guarantees
//! - Decay never increases a score and never drives it negative
//! - Rows at or below the threshold are not decayed further (they are
//!   deletion candidates, not decay candidates)
//! - Promoted patterns and unresolved feedback/questions survive the sweep
//!   regardless of score
//! - A malformed or missing timestamp skips that row only, counted in the
//!   report; the run continues
//! - The whole run is one transaction
//!
//! ## NOT Responsible For
//! - Raising scores (aggregation and merging do that)
//! - Deciding when to run (scheduling is the caller's policy)

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Transaction};

use crate::error::Result;
use crate::store::Store;

/// Rows with 0 < score below this value are deleted by the archival sweep;
/// rows at or above it keep decaying.
pub const ARCHIVE_THRESHOLD: f64 = 0.1;

/// Per-table half-lives, in days. λ = ln 2 / half-life.
pub const SOLUTIONS_HALF_LIFE: f64 = 70.0;
pub const PATTERNS_HALF_LIFE: f64 = 70.0;
pub const FEEDBACK_HALF_LIFE: f64 = 140.0;
pub const TEST_SESSIONS_HALF_LIFE: f64 = 87.0;
pub const DEV_SESSIONS_HALF_LIFE: f64 = 116.0;
pub const QUESTIONS_HALF_LIFE: f64 = 140.0;

/// Decay rate for a given half-life in days.
pub fn lambda(half_life_days: f64) -> f64 {
    std::f64::consts::LN_2 / half_life_days
}

/// Exponential decay of `score` over `days` elapsed days, rounded to four
/// decimal places. Negative elapsed time (a future anchor, clock skew) is
/// clamped to zero so decay can never raise a score.
pub fn decay_score(score: f64, days: f64, lambda: f64) -> f64 {
    let days = days.max(0.0);
    let decayed = score * (-lambda * days).exp();
    (decayed * 10_000.0).round() / 10_000.0
}

/// Per-table outcome of one decay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableReport {
    /// Rows whose score was recomputed.
    pub decayed: usize,
    /// Rows deleted by the archival sweep.
    pub archived: usize,
    /// Rows left untouched because their timestamp anchor was missing or
    /// unparseable.
    pub skipped: usize,
}

/// Outcome of one full decay run across every scored table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub solutions: TableReport,
    pub patterns: TableReport,
    pub feedback: TableReport,
    pub test_sessions: TableReport,
    pub dev_sessions: TableReport,
    pub questions: TableReport,
}

impl DecayReport {
    /// Table name / report pairs in sweep order, for display.
    pub fn tables(&self) -> [(&'static str, TableReport); 6] {
        [
            ("solutions", self.solutions),
            ("patterns", self.patterns),
            ("feedback", self.feedback),
            ("test_sessions", self.test_sessions),
            ("dev_sessions", self.dev_sessions),
            ("questions", self.questions),
        ]
    }
}

/// Parse a stored timestamp. Accepts RFC 3339 (what this crate writes) and
/// the bare `YYYY-MM-DDTHH:MM:SS[.frac]` shape older collaborators wrote.
fn parse_anchor(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Apply decay and the archival sweep across every scored table.
pub fn apply_decay(store: &mut Store) -> Result<DecayReport> {
    apply_decay_at(store, Utc::now())
}

/// Static description of one scored table: where its score anchor lives,
/// how fast it decays, and which rows the sweep may never delete.
struct TableSpec {
    table: &'static str,
    anchor_col: &'static str,
    half_life_days: f64,
    /// Extra sweep predicate; protected rows fail it and survive.
    sweep_guard: &'static str,
}

const TABLES: [TableSpec; 6] = [
    TableSpec {
        table: "solutions",
        anchor_col: "last_used",
        half_life_days: SOLUTIONS_HALF_LIFE,
        sweep_guard: "",
    },
    TableSpec {
        table: "patterns",
        anchor_col: "last_seen",
        half_life_days: PATTERNS_HALF_LIFE,
        sweep_guard: "AND promoted_to_memory = 0",
    },
    TableSpec {
        table: "feedback",
        anchor_col: "last_seen",
        half_life_days: FEEDBACK_HALF_LIFE,
        sweep_guard: "AND status = 'resolved'",
    },
    TableSpec {
        table: "test_sessions",
        anchor_col: "ts",
        half_life_days: TEST_SESSIONS_HALF_LIFE,
        sweep_guard: "",
    },
    TableSpec {
        table: "dev_sessions",
        anchor_col: "ts",
        half_life_days: DEV_SESSIONS_HALF_LIFE,
        sweep_guard: "",
    },
    TableSpec {
        table: "questions",
        anchor_col: "last_seen",
        half_life_days: QUESTIONS_HALF_LIFE,
        sweep_guard: "AND status = 'resolved'",
    },
];

/// Like [`apply_decay`] but with an injected clock, so tests control time.
pub fn apply_decay_at(store: &mut Store, now: DateTime<Utc>) -> Result<DecayReport> {
    let tx = store.transaction()?;
    let mut per_table = [TableReport::default(); 6];

    for (spec, out) in TABLES.iter().zip(per_table.iter_mut()) {
        // The sweep runs against the scores as they stood when this run
        // started: a row that decays below the threshold in this run is
        // only a deletion candidate for the NEXT run. The sweep (< T) and
        // the decay (> T) touch disjoint row sets, so running the delete
        // first inside the one transaction implements exactly that. Strict
        // bounds: a row exactly at the threshold is retained.
        out.archived = tx.execute(
            &format!(
                "DELETE FROM {} WHERE score < ?1 AND score > 0 {}",
                spec.table, spec.sweep_guard
            ),
            params![ARCHIVE_THRESHOLD],
        )?;
        let decayed = decay_table(&tx, spec, now)?;
        out.decayed = decayed.decayed;
        out.skipped = decayed.skipped;
    }

    tx.commit()?;

    let [solutions, patterns, feedback, test_sessions, dev_sessions, questions] = per_table;
    let report =
        DecayReport { solutions, patterns, feedback, test_sessions, dev_sessions, questions };

    for (table, t) in report.tables() {
        tracing::info!(
            table,
            decayed = t.decayed,
            archived = t.archived,
            skipped = t.skipped,
            "decay run complete"
        );
    }
    Ok(report)
}

/// Decay one table: recompute the score of every row above the threshold
/// with a parseable timestamp anchor. Returns decayed/skipped counts;
/// `archived` is filled in by the sweep.
fn decay_table(tx: &Transaction<'_>, spec: &TableSpec, now: DateTime<Utc>) -> Result<TableReport> {
    let TableSpec { table, anchor_col, half_life_days, .. } = spec;
    let lambda = lambda(*half_life_days);
    let mut report = TableReport::default();

    let rows: Vec<(i64, f64, Option<String>)> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT id, score, {anchor_col} FROM {table} WHERE score > ?1"
        ))?;
        let mapped = stmt.query_map(params![ARCHIVE_THRESHOLD], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        mapped.collect::<std::result::Result<_, _>>()?
    };

    for (id, score, anchor) in rows {
        let parsed = anchor.as_deref().and_then(parse_anchor);
        let Some(anchor_dt) = parsed else {
            tracing::warn!(table, id, "unparseable timestamp anchor, row skipped");
            report.skipped += 1;
            continue;
        };
        let days = (now - anchor_dt).num_days() as f64;
        let new_score = decay_score(score, days, lambda);
        tx.execute(
            &format!("UPDATE {table} SET score = ?1 WHERE id = ?2"),
            params![new_score, id],
        )?;
        report.decayed += 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rusqlite::params;

    const SOL_LAMBDA: f64 = std::f64::consts::LN_2 / SOLUTIONS_HALF_LIFE;

    // -- pure decay function ------------------------------------------------

    #[test]
    fn test_decay_zero_days_is_identity() {
        assert_eq!(decay_score(2.5, 0.0, SOL_LAMBDA), 2.5);
    }

    #[test]
    fn test_decay_half_life_halves_score() {
        let halved = decay_score(8.0, SOLUTIONS_HALF_LIFE, SOL_LAMBDA);
        assert!((halved - 4.0).abs() < 0.001, "got {halved}");
    }

    #[test]
    fn test_decay_monotonic_non_increasing() {
        for days in [0.0, 1.0, 7.0, 30.0, 365.0] {
            assert!(decay_score(3.0, days, SOL_LAMBDA) <= 3.0);
        }
    }

    #[test]
    fn test_decay_never_negative() {
        assert!(decay_score(0.0001, 10_000.0, SOL_LAMBDA) >= 0.0);
    }

    #[test]
    fn test_decay_future_anchor_clamped() {
        // Negative elapsed days must not raise the score.
        assert_eq!(decay_score(2.0, -30.0, SOL_LAMBDA), 2.0);
    }

    #[test]
    fn test_decay_composes_multiplicatively() {
        let direct = decay_score(5.0, 30.0, SOL_LAMBDA);
        let staged = decay_score(decay_score(5.0, 12.0, SOL_LAMBDA), 18.0, SOL_LAMBDA);
        assert!((direct - staged).abs() < 0.001, "direct={direct} staged={staged}");
    }

    #[test]
    fn test_lambda_from_half_life() {
        // λ = ln2/70 ≈ 0.0099, the reference solutions rate.
        assert!((lambda(70.0) - 0.0099).abs() < 0.0002);
        assert!((lambda(140.0) - 0.005).abs() < 0.0002);
    }

    proptest! {
        #[test]
        fn prop_decay_non_increasing(score in 0.0f64..1000.0, days in 0.0f64..3650.0) {
            prop_assert!(decay_score(score, days, SOL_LAMBDA) <= score + 1e-9);
        }

        #[test]
        fn prop_decay_non_negative(score in 0.0f64..1000.0, days in 0.0f64..3650.0) {
            prop_assert!(decay_score(score, days, SOL_LAMBDA) >= 0.0);
        }

        #[test]
        fn prop_decay_composes(score in 0.1f64..100.0, d1 in 0.0f64..365.0, d2 in 0.0f64..365.0) {
            let direct = decay_score(score, d1 + d2, SOL_LAMBDA);
            let staged = decay_score(decay_score(score, d1, SOL_LAMBDA), d2, SOL_LAMBDA);
            // Two roundings to 4 decimals vs one.
            prop_assert!((direct - staged).abs() < 0.001);
        }
    }

    // -- parse_anchor -------------------------------------------------------

    #[test]
    fn test_parse_anchor_rfc3339() {
        assert!(parse_anchor("2026-08-01T10:00:00+00:00").is_some());
        assert!(parse_anchor("2026-08-01T10:00:00Z").is_some());
    }

    #[test]
    fn test_parse_anchor_naive_iso() {
        assert!(parse_anchor("2026-08-01T10:00:00").is_some());
        assert!(parse_anchor("2026-08-01T10:00:00.123456").is_some());
    }

    #[test]
    fn test_parse_anchor_garbage_is_none() {
        assert!(parse_anchor("not a date").is_none());
        assert!(parse_anchor("").is_none());
    }

    // -- store-level sweep --------------------------------------------------

    fn now() -> DateTime<Utc> {
        "2026-08-30T12:00:00Z".parse().expect("fixed clock")
    }

    fn days_ago(days: i64) -> String {
        (now() - chrono::Duration::days(days)).to_rfc3339()
    }

    fn seed_solution(store: &Store, pattern: &str, score: f64, last_used: Option<String>) {
        store
            .conn()
            .execute(
                "INSERT INTO solutions(error_pattern, project, score, last_used)
                 VALUES (?1, 'app', ?2, ?3)",
                params![pattern, score, last_used],
            )
            .expect("seed solution");
    }

    fn solution_score(store: &Store, pattern: &str) -> Option<f64> {
        store
            .conn()
            .query_row(
                "SELECT score FROM solutions WHERE error_pattern = ?1",
                params![pattern],
                |row| row.get(0),
            )
            .ok()
    }

    #[test]
    fn test_stale_solution_score_reduced() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "p1", 4.0, Some(days_ago(70)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.decayed, 1);
        let score = solution_score(&store, "p1").expect("row kept");
        assert!((score - 2.0).abs() < 0.01, "one half-life should halve: {score}");
    }

    #[test]
    fn test_fresh_solution_untouched_by_sweep() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "p1", 4.0, Some(days_ago(0)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.archived, 0);
        assert_eq!(solution_score(&store, "p1"), Some(4.0));
    }

    #[test]
    fn test_row_below_threshold_not_decayed_then_swept() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "dying", 0.05, Some(days_ago(10)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.decayed, 0, "score ≤ T stops decaying");
        assert_eq!(report.solutions.archived, 1);
        assert_eq!(solution_score(&store, "dying"), None);
    }

    #[test]
    fn test_score_exactly_at_threshold_retained() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "edge", ARCHIVE_THRESHOLD, Some(days_ago(10)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.archived, 0);
        assert_eq!(solution_score(&store, "edge"), Some(ARCHIVE_THRESHOLD));
    }

    #[test]
    fn test_zero_score_rows_never_swept() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "zeroed", 0.0, Some(days_ago(10)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.archived, 0);
        assert_eq!(solution_score(&store, "zeroed"), Some(0.0));
    }

    #[test]
    fn test_missing_anchor_skips_row_and_continues() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "no-anchor", 4.0, None);
        seed_solution(&store, "fine", 4.0, Some(days_ago(70)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.skipped, 1);
        assert_eq!(report.solutions.decayed, 1);
        assert_eq!(solution_score(&store, "no-anchor"), Some(4.0));
    }

    #[test]
    fn test_malformed_anchor_skips_row_only() {
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "garbled", 4.0, Some("yesterday-ish".to_string()));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.skipped, 1);
        assert_eq!(solution_score(&store, "garbled"), Some(4.0));
    }

    #[test]
    fn test_promoted_pattern_survives_sweep() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .conn()
            .execute(
                "INSERT INTO patterns(pattern, score, promoted_to_memory, last_seen)
                 VALUES ('[k] a → b', 0.05, 1, ?1),
                        ('[k] c → d', 0.05, 0, ?1)",
                params![days_ago(10)],
            )
            .expect("seed patterns");

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.patterns.archived, 1, "only the unprotected pattern goes");
        let kept: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM patterns WHERE promoted_to_memory = 1", [], |r| {
                r.get(0)
            })
            .expect("count");
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_unresolved_feedback_survives_sweep() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .conn()
            .execute(
                "INSERT INTO feedback(category, wrong_approach, correct_approach, score, status, last_seen)
                 VALUES ('t', 'w', 'c', 0.05, 'open', ?1),
                        ('t', 'w2', 'c2', 0.05, 'resolved', ?1)",
                params![days_ago(10)],
            )
            .expect("seed feedback");

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.feedback.archived, 1, "only resolved feedback is deleted");
    }

    #[test]
    fn test_sibling_session_tables_decay_on_ts() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .conn()
            .execute(
                "INSERT INTO test_sessions(score, ts) VALUES (2.0, ?1)",
                params![days_ago(87)],
            )
            .expect("seed test session");
        store
            .conn()
            .execute(
                "INSERT INTO dev_sessions(score, ts) VALUES (2.0, ?1)",
                params![days_ago(116)],
            )
            .expect("seed dev session");

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.test_sessions.decayed, 1);
        assert_eq!(report.dev_sessions.decayed, 1);

        let ts_score: f64 = store
            .conn()
            .query_row("SELECT score FROM test_sessions", [], |r| r.get(0))
            .expect("score");
        assert!((ts_score - 1.0).abs() < 0.01, "one half-life halves: {ts_score}");
    }

    #[test]
    fn test_resolved_question_swept_open_question_kept() {
        let mut store = Store::open_in_memory().expect("open");
        store
            .conn()
            .execute(
                "INSERT INTO questions(question, score, status, last_seen)
                 VALUES ('why?', 0.05, 'resolved', ?1),
                        ('how?', 0.05, 'open', ?1)",
                params![days_ago(10)],
            )
            .expect("seed questions");

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.questions.archived, 1);
        let remaining: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM questions", [], |r| r.get(0))
            .expect("count");
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_decay_then_sweep_in_same_run() {
        // A row far above the threshold decays but is not deleted in the
        // same sweep even when decay lands it below T only after rounding
        // games — here it stays well above T.
        let mut store = Store::open_in_memory().expect("open");
        seed_solution(&store, "healthy", 5.0, Some(days_ago(7)));

        let report = apply_decay_at(&mut store, now()).expect("decay");
        assert_eq!(report.solutions.decayed, 1);
        assert_eq!(report.solutions.archived, 0);
        assert!(solution_score(&store, "healthy").expect("kept") > ARCHIVE_THRESHOLD);
    }
}
