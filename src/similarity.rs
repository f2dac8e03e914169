//! # Stage: Similarity Engine
//!
//! ## Responsibility
//! TF-IDF scoring over solution patterns. Two jobs: rank existing solutions
//! against a query error text ([`find_similar`]), and collapse near-duplicate
//! solution rows into their highest-scored representative
//! ([`merge_similar_solutions`]).
//!
//! ## Guarantees
//! - Tokenization, tf, idf and cosine are pure functions of their inputs
//! - `find_similar` never mutates the store
//! - A merge preserves total `success_count` and deletes only the
//!   lower-scored row of each pair; the whole merge is one transaction
//! - A row absorbed once is never used as a merge source or target again
//!   in the same run
//!
//! ## NOT Responsible For
//! - Normalization (queries and patterns are compared as stored)
//! - Deciding thresholds (callers pass them; see the CLI defaults)

use rusqlite::params;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::store::Store;

/// Minimum cosine similarity for a lookup hit.
pub const DEFAULT_FIND_THRESHOLD: f64 = 0.5;
/// Minimum cosine similarity for collapsing two solutions into one.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.7;
/// Maximum hits returned by a lookup.
pub const DEFAULT_LIMIT: usize = 5;

/// Lookups rank against the top-scored slice of the corpus, not all of it.
const CORPUS_LIMIT: usize = 200;

/// One lookup hit, ordered by descending `similarity`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub id: i64,
    pub pattern: String,
    pub solution: Option<String>,
    pub score: f64,
    /// Cosine similarity against the query, rounded to three decimals.
    pub similarity: f64,
}

/// Sparse tf-idf vector keyed by token.
type Vector = HashMap<String, f64>;

/// Lowercase, strip everything outside `[a-z0-9_]`, keep tokens longer than
/// two characters. `<path>` and `<hash>` placeholders survive as the bare
/// words `path` and `hash`, so normalized patterns compare naturally.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| t.len() > 2);
    tokens
}

/// Term frequency: token count over document length.
fn compute_tf(tokens: &[String]) -> Vector {
    let total = tokens.len().max(1) as f64;
    let mut tf = Vector::new();
    for t in tokens {
        *tf.entry(t.clone()).or_insert(0.0) += 1.0;
    }
    for v in tf.values_mut() {
        *v /= total;
    }
    tf
}

/// Inverse document frequency over a corpus: ln(N / (1 + df)).
///
/// A token present in every document lands slightly below zero, which
/// deliberately discounts boilerplate words shared by the whole corpus.
fn compute_idf(documents: &[Vec<String>]) -> HashMap<String, f64> {
    let n = documents.len().max(1) as f64;
    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in documents {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for t in unique {
            *df.entry(t).or_insert(0) += 1;
        }
    }
    df.into_iter()
        .map(|(t, c)| (t.to_string(), (n / (1.0 + c as f64)).ln()))
        .collect()
}

fn tfidf(tokens: &[String], idf: &HashMap<String, f64>) -> Vector {
    compute_tf(tokens)
        .into_iter()
        .map(|(t, tf)| {
            let w = idf.get(&t).copied().unwrap_or(0.0);
            (t, tf * w)
        })
        .collect()
}

/// Cosine similarity between two sparse vectors. Zero when either vector is
/// empty or has zero magnitude.
fn cosine_similarity(a: &Vector, b: &Vector) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(t, va)| b.get(t).map(|vb| va * vb))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let mag_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let mag_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Rank the top-scored solutions against `query`, returning up to `limit`
/// hits at or above `threshold`, most similar first.
///
/// The idf corpus is the query plus the retrieved patterns, recomputed per
/// call, so weights reflect what is actually being compared.
pub fn find_similar(
    store: &Store,
    query: &str,
    threshold: f64,
    limit: usize,
) -> Result<Vec<SimilarMatch>> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64, String, Option<String>, f64)> = {
        let mut stmt = store.conn().prepare(
            "SELECT id, error_pattern, solution, score FROM solutions
             ORDER BY score DESC LIMIT ?1",
        )?;
        let mapped = stmt.query_map(params![CORPUS_LIMIT as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        mapped.collect::<std::result::Result<_, _>>()?
    };
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let doc_tokens: Vec<Vec<String>> = rows.iter().map(|r| tokenize(&r.1)).collect();
    let mut all_docs = Vec::with_capacity(doc_tokens.len() + 1);
    all_docs.push(query_tokens.clone());
    all_docs.extend(doc_tokens.iter().cloned());
    let idf = compute_idf(&all_docs);

    let query_vec = tfidf(&query_tokens, &idf);

    let mut hits: Vec<SimilarMatch> = rows
        .into_iter()
        .zip(doc_tokens.iter())
        .filter_map(|((id, pattern, solution, score), tokens)| {
            let sim = cosine_similarity(&query_vec, &tfidf(tokens, &idf));
            if sim >= threshold {
                Some(SimilarMatch {
                    id,
                    pattern,
                    solution,
                    score,
                    similarity: (sim * 1000.0).round() / 1000.0,
                })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(limit);
    Ok(hits)
}

/// Collapse near-duplicate solutions. Rows are visited in descending score
/// order; for each survivor, every later row at or above `threshold` is
/// absorbed into it (`success_count` added, half the absorbed score added)
/// and deleted. Returns the number of rows absorbed.
pub fn merge_similar_solutions(store: &mut Store, threshold: f64) -> Result<usize> {
    let tx = store.transaction()?;

    let rows: Vec<(i64, String, i64, f64)> = {
        let mut stmt = tx.prepare(
            "SELECT id, error_pattern, success_count, score FROM solutions
             ORDER BY score DESC",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        mapped.collect::<std::result::Result<_, _>>()?
    };
    if rows.len() < 2 {
        tx.commit()?;
        return Ok(0);
    }

    let doc_tokens: Vec<Vec<String>> = rows.iter().map(|r| tokenize(&r.1)).collect();
    let idf = compute_idf(&doc_tokens);
    let vectors: Vec<Vector> = doc_tokens.iter().map(|t| tfidf(t, &idf)).collect();

    let mut merged_ids: HashSet<i64> = HashSet::new();
    let mut merged = 0usize;

    for i in 0..rows.len() {
        if merged_ids.contains(&rows[i].0) {
            continue;
        }
        for j in (i + 1)..rows.len() {
            if merged_ids.contains(&rows[j].0) {
                continue;
            }
            let sim = cosine_similarity(&vectors[i], &vectors[j]);
            if sim >= threshold {
                tx.execute(
                    "UPDATE solutions
                     SET success_count = success_count + ?1, score = score + ?2
                     WHERE id = ?3",
                    params![rows[j].2, rows[j].3 * 0.5, rows[i].0],
                )?;
                tx.execute("DELETE FROM solutions WHERE id = ?1", params![rows[j].0])?;
                merged_ids.insert(rows[j].0);
                merged += 1;
            }
        }
    }

    tx.commit()?;
    tracing::info!(merged, threshold, "similarity merge complete");
    Ok(merged)
}
