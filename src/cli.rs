use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::aggregate::DEFAULT_WINDOW;
use crate::similarity::{DEFAULT_FIND_THRESHOLD, DEFAULT_LIMIT, DEFAULT_MERGE_THRESHOLD};

#[derive(Parser)]
#[command(name = "dev-intel")]
#[command(version)]
#[command(about = "Knowledge consolidation over recurring development errors")]
pub struct Args {
    /// Path to the SQLite knowledge base (overrides DEV_INTEL_DB and config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fold recent error events into solution patterns
    Aggregate {
        /// Also promote stable feedback entries to patterns
        #[arg(long)]
        promote_feedback: bool,

        /// How many of the newest events to examine
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: usize,
    },

    /// Apply time decay to all scores and archive what fell below threshold
    Decay,

    /// Rank stored solutions against an error text, or merge near-duplicates
    Similarity {
        /// Error text to match (ignored with --merge)
        #[arg(trailing_var_arg = true, required_unless_present = "merge")]
        text: Vec<String>,

        /// Merge near-duplicate solutions instead of searching
        #[arg(long)]
        merge: bool,

        /// Minimum cosine similarity (defaults: 0.5 search, 0.7 merge)
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum number of matches to print
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
}

/// The similarity threshold depends on the operation: merging demands a
/// tighter match than lookup, so each gets its own default.
pub fn resolve_threshold(threshold: Option<f64>, merge: bool) -> f64 {
    threshold.unwrap_or(if merge {
        DEFAULT_MERGE_THRESHOLD
    } else {
        DEFAULT_FIND_THRESHOLD
    })
}
