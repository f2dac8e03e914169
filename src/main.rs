use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use dev_intel::aggregate::{aggregate, AggregateSummary};
use dev_intel::cli::{resolve_threshold, Args, Command};
use dev_intel::config::resolve_db_path;
use dev_intel::decay::apply_decay;
use dev_intel::error::Result;
use dev_intel::promote::promote_feedback;
use dev_intel::similarity::{find_similar, merge_similar_solutions};
use dev_intel::store::Store;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

/// What the `aggregate` subcommand did: either one aggregation pass, or
/// one promotion pass when `--promote-feedback` is set. Either/or, never
/// both — promotion must not trigger an extra event recount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateOutcome {
    Aggregated(AggregateSummary),
    Promoted(usize),
}

fn run_aggregate(store: &mut Store, window: usize, promote: bool) -> Result<AggregateOutcome> {
    if promote {
        Ok(AggregateOutcome::Promoted(promote_feedback(store)?))
    } else {
        Ok(AggregateOutcome::Aggregated(aggregate(store, window)?))
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let db_path = resolve_db_path(args.db.as_deref())?;
    let mut store = Store::open(&db_path)?;

    match args.command {
        Command::Aggregate { promote_feedback: promote, window } => {
            match run_aggregate(&mut store, window, promote)? {
                AggregateOutcome::Aggregated(summary) if summary.events_processed == 0 => {
                    println!("No events to aggregate.");
                }
                AggregateOutcome::Aggregated(summary) => {
                    println!(
                        "Aggregated: {} events → {} solution patterns",
                        summary.events_processed.to_string().bright_white(),
                        summary.patterns_upserted.to_string().bright_green()
                    );
                }
                AggregateOutcome::Promoted(0) => {
                    println!("No feedback ready for promotion");
                }
                AggregateOutcome::Promoted(promoted) => {
                    println!(
                        "Promoted {} feedback entries to patterns",
                        promoted.to_string().bright_green()
                    );
                }
            }
        }

        Command::Decay => {
            let report = apply_decay(&mut store)?;
            for (table, t) in report.tables() {
                println!(
                    "{:<14} decayed {:>5}  archived {:>4}  skipped {:>3}",
                    table.bright_yellow(),
                    t.decayed,
                    t.archived,
                    t.skipped
                );
            }
        }

        Command::Similarity { text, merge, threshold, limit } => {
            let threshold = resolve_threshold(threshold, merge);
            if merge {
                let merged = merge_similar_solutions(&mut store, threshold)?;
                println!(
                    "Merged {} similar solutions",
                    merged.to_string().bright_green()
                );
            } else {
                let query = text.join(" ");
                let hits = find_similar(&store, &query, threshold, limit)?;
                if hits.is_empty() {
                    println!("No similar solutions found.");
                }
                for hit in hits {
                    println!(
                        "[sim={:.2} score={:.1}] {}",
                        hit.similarity,
                        hit.score,
                        clip(&hit.pattern, 80).bright_cyan()
                    );
                    if let Some(solution) = &hit.solution {
                        println!("  → {}", clip(solution, 120));
                    }
                    println!();
                }
            }
        }
    }

    Ok(())
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn seed_event(store: &Store, error: &str) {
        store
            .conn()
            .execute(
                "INSERT INTO events(ts, error, project) \
                 VALUES ('2026-08-01T10:00:00Z', ?1, 'app')",
                params![error],
            )
            .expect("seed event");
    }

    fn seed_stable_feedback(store: &Store) {
        store
            .conn()
            .execute(
                "INSERT INTO feedback(category, wrong_approach, correct_approach,
                                      scope, confirmation_count, score)
                 VALUES ('style', 'manual formatting', 'use the linter', 'project', 4, 1.5)",
                [],
            )
            .expect("seed feedback");
    }

    fn solution_count(store: &Store) -> i64 {
        store
            .conn()
            .query_row("SELECT COUNT(*) FROM solutions", [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn test_aggregate_without_flag_folds_events() {
        let mut store = Store::open_in_memory().expect("open");
        seed_event(&store, "boom");

        let outcome = run_aggregate(&mut store, 500, false).expect("run");
        assert_eq!(
            outcome,
            AggregateOutcome::Aggregated(AggregateSummary {
                events_processed: 1,
                patterns_upserted: 1,
            })
        );
        assert_eq!(solution_count(&store), 1);
    }

    #[test]
    fn test_promote_flag_skips_aggregation() {
        let mut store = Store::open_in_memory().expect("open");
        seed_event(&store, "boom");
        seed_stable_feedback(&store);

        let outcome = run_aggregate(&mut store, 500, true).expect("run");
        assert_eq!(outcome, AggregateOutcome::Promoted(1));

        // The events window was never read: no solution rows, no counts.
        assert_eq!(solution_count(&store), 0);
        let patterns: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))
            .expect("count");
        assert_eq!(patterns, 1);
    }

    #[test]
    fn test_promote_flag_does_not_recount_existing_solutions() {
        let mut store = Store::open_in_memory().expect("open");
        seed_event(&store, "boom");

        run_aggregate(&mut store, 500, false).expect("plain run");
        run_aggregate(&mut store, 500, true).expect("flagged run");

        let count: i64 = store
            .conn()
            .query_row(
                "SELECT success_count FROM solutions WHERE error_pattern = 'boom'",
                [],
                |row| row.get(0),
            )
            .expect("row");
        assert_eq!(count, 1, "flagged invocation must not re-aggregate");
    }

    #[test]
    fn test_promote_flag_with_no_stable_feedback() {
        let mut store = Store::open_in_memory().expect("open");
        let outcome = run_aggregate(&mut store, 500, true).expect("run");
        assert_eq!(outcome, AggregateOutcome::Promoted(0));
    }
}
