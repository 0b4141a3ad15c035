//! Reciprocal Rank Fusion (RRF) of semantic and lexical result lists.
//!
//! ```text
//! score(d) = Σ 1 / (k + rank_i(d))
//! ```
//!
//! Ranks are 1-based. An item absent from a list gets nothing from that
//! list. Items are matched across lists by the first [`FUSION_KEY_CHARS`]
//! characters of their content rather than by chunk id, so two distinct
//! chunks sharing that prefix collapse into one fused entry.

use std::collections::HashMap;

use crate::models::SearchResult;

/// Standard RRF constant.
pub const RRF_K: u32 = 60;

/// Length of the content prefix used to identify an item across lists.
pub const FUSION_KEY_CHARS: usize = 100;

/// Identity key of a result for fusion purposes.
pub fn fusion_key(content: &str) -> &str {
    match content.char_indices().nth(FUSION_KEY_CHARS) {
        Some((byte, _)) => &content[..byte],
        None => content,
    }
}

/// Contribution of one list position.
pub fn rrf_contribution(rank: usize, k: u32) -> f64 {
    1.0 / (rank as f64 + k as f64)
}

/// Fuse two ranked lists and keep the top `limit`.
///
/// The record kept for a key is the first one seen, semantic list first.
/// Its `score` is replaced by the fused score. Equal fused scores keep
/// first-seen order.
pub fn reciprocal_rank_fusion(
    semantic: Vec<SearchResult>,
    lexical: Vec<SearchResult>,
    k: u32,
    limit: usize,
) -> Vec<SearchResult> {
    let mut order: Vec<SearchResult> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for list in [semantic, lexical] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = rrf_contribution(rank + 1, k);
            let key = fusion_key(&result.content).to_string();
            match slots.get(&key) {
                Some(&slot) => scores[slot] += contribution,
                None => {
                    slots.insert(key, order.len());
                    order.push(result);
                    scores.push(contribution);
                }
            }
        }
    }

    let mut fused: Vec<SearchResult> = order
        .into_iter()
        .zip(scores)
        .map(|(mut result, score)| {
            result.score = score;
            result
        })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}
