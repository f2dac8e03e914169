//! Knowledge consolidation over recurring development errors.
//!
//! Raw error events captured during development are folded into a small
//! SQLite knowledge base: normalization strips the volatile parts of error
//! text, aggregation groups occurrences into scored solution records,
//! exponential decay ages everything out over time, TF-IDF similarity ranks
//! and merges near-duplicates, and stable feedback is promoted into
//! first-class patterns.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod decay;
pub mod error;
pub mod normalize;
pub mod promote;
pub mod similarity;
pub mod store;

pub use error::{IntelError, Result};
pub use store::Store;
