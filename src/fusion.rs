//! Evidence fusion: merge, dedupe, and rank results from both sources.

use std::collections::HashSet;

use crate::models::{Provenance, SearchResult};

/// Characters of normalized content used as the dedup key. Long enough to
/// distinguish real chunks, short enough to catch a chunk and the web page
/// it was scraped from.
const DEDUP_KEY_CHARS: usize = 120;

/// Merge knowledge and web results into a single ranked evidence list.
///
/// Ordering is score descending; at equal scores knowledge results come
/// before web results. Near-duplicate content (same normalized prefix) is
/// collapsed to its best-scoring occurrence. The output is capped at
/// `max_results`.
pub fn fuse(
    knowledge: Vec<SearchResult>,
    web: Vec<SearchResult>,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut combined = knowledge;
    combined.extend(web);

    // Stable sort: equal scores keep knowledge (listed first) ahead of web.
    combined.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank(a.provenance).cmp(&rank(b.provenance)))
    });

    let mut seen = HashSet::new();
    let mut fused = Vec::new();
    for result in combined {
        if seen.insert(content_key(&result.content)) {
            fused.push(result);
            if fused.len() == max_results {
                break;
            }
        }
    }
    fused
}

fn rank(p: Provenance) -> u8 {
    match p {
        Provenance::Knowledge => 0,
        Provenance::Web => 1,
    }
}

/// Normalized content prefix: lowercased, whitespace collapsed to single
/// spaces, truncated to a fixed number of characters.
fn content_key(content: &str) -> String {
    let mut key = String::with_capacity(DEDUP_KEY_CHARS);
    let mut last_was_space = false;
    for c in content.trim().chars() {
        if key.chars().count() >= DEDUP_KEY_CHARS {
            break;
        }
        if c.is_whitespace() {
            if !last_was_space {
                key.push(' ');
                last_was_space = true;
            }
        } else {
            for lc in c.to_lowercase() {
                key.push(lc);
            }
            last_was_space = false;
        }
    }
    key
}
