
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::index::VectorIndexSnapshot;
use crate::store::EmbeddingRecord;

/// Lowest score a keyword-overlap match can receive
pub const KEYWORD_MIN_SCORE: f32 = 0.3;
/// Highest score a keyword-overlap match can receive
pub const KEYWORD_MAX_SCORE: f32 = 0.5;

/// Tokens shorter than this many characters are ignored by keyword matching
const MIN_TOKEN_CHARS: usize = 3;

/// One scored candidate produced by a search call
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub record: EmbeddingRecord,
    /// Cosine similarity in [-1, 1], or a synthesized keyword score
    pub score: f32,
}

/// Cosine similarity of two vectors.
///
/// Vectors of different length are compared over their common prefix only.
/// That is a lossy, degraded-accuracy mode; callers that can detect it should
/// log it. A zero-magnitude input yields exactly 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (&x, &y) in a.iter().zip(b) {
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Rank every record of `snapshot` against `query`.
///
/// Returns at most `top_k` matches scoring at least `threshold`, best first.
/// Ties keep snapshot order, so identical inputs give identical output.
#[inline]
pub fn rank(
    query: &[f32],
    snapshot: &VectorIndexSnapshot,
    threshold: f32,
    top_k: usize,
) -> Vec<MatchResult> {
    let records = snapshot.records();
    let mut mismatched = 0_usize;

    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| {
            if record.vector.len() != query.len() {
                mismatched += 1;
            }
            let score = cosine_similarity(query, &record.vector);
            (score >= threshold).then_some((position, score))
        })
        .collect();

    if mismatched > 0 {
        warn!(
            "{} of {} indexed vectors differ from the query dimension {}; compared over the common prefix",
            mismatched,
            records.len(),
            query.len()
        );
    }

    sort_descending(&mut scored);
    scored.truncate(top_k);

    debug!(
        "Vector ranking kept {} of {} records (threshold {:.2})",
        scored.len(),
        records.len(),
        threshold
    );

    collect_matches(records, scored)
}

/// Score records by how many distinct query tokens their segment contains.
///
/// Scores are synthesized into `[KEYWORD_MIN_SCORE, KEYWORD_MAX_SCORE]` so the
/// usual similarity gates still apply. Records sharing no token are dropped.
#[inline]
pub fn keyword_rank(query: &str, snapshot: &VectorIndexSnapshot, top_k: usize) -> Vec<MatchResult> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        debug!("Query has no keyword of at least {} characters", MIN_TOKEN_CHARS);
        return Vec::new();
    }

    let records = snapshot.records();
    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| {
            let segment_tokens = tokenize(&record.segment);
            let matched = query_tokens
                .iter()
                .filter(|token| segment_tokens.contains(*token))
                .count();
            (matched > 0).then(|| (position, keyword_score(matched, query_tokens.len())))
        })
        .collect();

    sort_descending(&mut scored);
    scored.truncate(top_k);

    debug!(
        "Keyword ranking matched {} of {} records",
        scored.len(),
        records.len()
    );

    collect_matches(records, scored)
}

/// Lower-cased words of at least three characters, split on anything that is
/// not alphanumeric
#[inline]
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

fn keyword_score(matched: usize, total: usize) -> f32 {
    let ratio = matched as f32 / total as f32;
    (KEYWORD_MAX_SCORE - KEYWORD_MIN_SCORE).mul_add(ratio, KEYWORD_MIN_SCORE)
}

/// Ordering that puts higher scores first; incomparable scores count as equal
#[inline]
pub fn by_score_descending(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

// `sort_by` is stable, which keeps snapshot order among equal scores
fn sort_descending(scored: &mut [(usize, f32)]) {
    scored.sort_by(|(_, a), (_, b)| by_score_descending(*a, *b));
}

fn collect_matches(records: &[EmbeddingRecord], scored: Vec<(usize, f32)>) -> Vec<MatchResult> {
    scored
        .into_iter()
        .filter_map(|(position, score)| {
            records.get(position).map(|record| MatchResult {
                record: record.clone(),
                score,
            })
        })
        .collect()
}
