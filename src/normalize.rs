//! # Stage: Normalizer
//!
//! ## Responsibility
//! Canonicalize raw error text into a stable pattern string by redacting
//! volatile details: file paths, line/column locators, and hash-like hex
//! runs. Two occurrences of the same underlying fault from different files
//! or commits normalize to the same pattern.
//!
//! ## Guarantees
//! - Deterministic: pure function of its input
//! - Idempotent: `normalize(normalize(x)) == normalize(x)`
//! - Total: never fails; empty input yields the empty string
//! - Bounded: output is at most 200 characters (char-boundary safe)
//!
//! ## NOT Responsible For
//! - Similarity between distinct patterns (see `similarity`)
//! - Persisting anything

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of a stored pattern string.
pub const MAX_PATTERN_LEN: usize = 200;

// Replacement order matters: paths carry their own `:line:col` suffixes,
// so paths go first, then locators, then hex runs, then whitespace.
// Longest alternative first: `tsx` before `ts` so the extension is consumed
// whole instead of leaving a stray trailing character.
static RE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[\w/.\-]+\.(tsx|ts|jsx|js|py|rs|go)").expect("valid regex"));
static RE_LINE_COL: Lazy<Regex> = Lazy::new(|| Regex::new(r":\d+:\d+").expect("valid regex"));
static RE_LINE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)line \d+").expect("valid regex"));
static RE_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-f]{8,}").expect("valid regex"));
static RE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Canonicalize raw error text into a pattern string.
///
/// Every `error_pattern` persisted by this crate is the output of this
/// function — raw text never reaches the solutions table.
pub fn normalize(raw: &str) -> String {
    let s = RE_PATH.replace_all(raw, "<path>");
    let s = RE_LINE_COL.replace_all(&s, ":<line>");
    let s = RE_LINE_WORD.replace_all(&s, "line <n>");
    let s = RE_HEX.replace_all(&s, "<hash>");
    let s = RE_SPACE.replace_all(&s, " ");
    let s = s.trim();
    if s.chars().count() > MAX_PATTERN_LEN {
        // Truncation can expose a trailing space; trim again so the result
        // is a fixed point of this function.
        let cut: String = s.chars().take(MAX_PATTERN_LEN).collect();
        cut.trim_end().to_string()
    } else {
        s.to_string()
    }
}
