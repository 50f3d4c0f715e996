//! Near-duplicate suppression.
//!
//! Similarity is the insert/delete ratio `2 * LCS / (len_a + len_b)` over
//! normalized text, computed with a bit-parallel LCS. Only the first
//! [`MAX_COMPARED_CHARS`] normalized characters of a passage are compared.

use std::collections::HashMap;

use rag_vector::RetrievalCandidate;
use tracing::debug;

/// Default similarity above which two passages are duplicates.
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.9;

/// Normalized characters of a passage that take part in comparison
pub const MAX_COMPARED_CHARS: usize = 2048;

/// Lower-case and collapse runs of whitespace to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized, length-capped characters of `text`.
fn comparable(text: &str) -> Vec<char> {
    normalize_text(text).chars().take(MAX_COMPARED_CHARS).collect()
}

/// Length of the longest common subsequence of two char slices.
///
/// Bit-parallel (Hyyrö): one bit per char of the shorter slice, so the cost
/// is `len(long) * ceil(len(short) / 64)` word operations.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0;
    }

    let words = short.len().div_ceil(64);
    let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
    for (i, &c) in short.iter().enumerate() {
        masks.entry(c).or_insert_with(|| vec![0; words])[i / 64] |= 1u64 << (i % 64);
    }

    // Zero bits of `v` mark matched positions of `short`
    let mut v = vec![u64::MAX; words];
    for c in long {
        let Some(mask) = masks.get(c) else {
            continue;
        };
        let mut carry = false;
        for (word, &m) in v.iter_mut().zip(mask) {
            let u = *word & m;
            let (sum, c1) = word.overflowing_add(u);
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            carry = c1 || c2;
            *word = sum | (*word & !m);
        }
    }

    let tail_bits = short.len() - (words - 1) * 64;
    let tail_mask = if tail_bits == 64 {
        u64::MAX
    } else {
        (1u64 << tail_bits) - 1
    };
    v.iter()
        .enumerate()
        .map(|(i, &word)| {
            let valid = if i + 1 == words { tail_mask } else { u64::MAX };
            (!word & valid).count_ones() as usize
        })
        .sum()
}

/// Similarity ratio of two already-normalized char sequences.
///
/// Returns a value in `[0.0, 1.0]`; two empty strings score 1.0.
fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * lcs_len(a, b)) as f64 / total as f64
}

/// Whether the ratio of `a` and `b` exceeds `threshold`.
///
/// The length bound `2 * min / (len_a + len_b)` rules most pairs out
/// without computing the LCS.
fn ratio_exceeds(a: &[char], b: &[char], threshold: f64) -> bool {
    let total = a.len() + b.len();
    if total > 0 {
        let bound = (2 * a.len().min(b.len())) as f64 / total as f64;
        if bound <= threshold {
            return false;
        }
    }
    ratio_chars(a, b) > threshold
}

/// Fuzzy similarity of two texts after normalization, in `[0.0, 1.0]`.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    ratio_chars(&comparable(a), &comparable(b))
}

/// Drops candidates too similar to a better-ranked one.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD)
    }
}

impl Deduplicator {
    /// Threshold is clamped into `[0.0, 1.0]`.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether two texts count as duplicates.
    pub fn is_duplicate(&self, a: &str, b: &str) -> bool {
        ratio_exceeds(&comparable(a), &comparable(b), self.threshold)
    }

    /// Filter `candidates`, keeping input order.
    ///
    /// Single left-to-right pass: a candidate survives only if its similarity
    /// to every survivor so far does not exceed the threshold. Of each
    /// duplicate pair the earlier (better-ranked) one is kept.
    pub fn dedup(&self, candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
        self.dedup_limited(candidates, usize::MAX)
    }

    /// [`dedup`](Self::dedup) truncated to `limit` survivors.
    ///
    /// Stops scanning once `limit` candidates are kept.
    pub fn dedup_limited(
        &self,
        candidates: Vec<RetrievalCandidate>,
        limit: usize,
    ) -> Vec<RetrievalCandidate> {
        let input = candidates.len();
        let mut accepted: Vec<RetrievalCandidate> = Vec::with_capacity(input.min(limit));
        let mut accepted_text: Vec<Vec<char>> = Vec::with_capacity(input.min(limit));

        for candidate in candidates {
            if accepted.len() >= limit {
                break;
            }
            let text = comparable(candidate.text());

            let duplicate_of = accepted_text
                .iter()
                .position(|kept| ratio_exceeds(kept, &text, self.threshold));

            match duplicate_of {
                Some(i) => debug!(
                    dropped = %candidate.passage.doc_id,
                    kept = %accepted[i].passage.doc_id,
                    "Dropped near-duplicate"
                ),
                None => {
                    accepted_text.push(text);
                    accepted.push(candidate);
                }
            }
        }

        debug!(input, kept = accepted.len(), "Dedup complete");
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_types::{Passage, SourceRef};
    use std::sync::Arc;

    fn candidate(id: &str, text: &str, distance: f32) -> RetrievalCandidate {
        RetrievalCandidate::new(
            Arc::new(Passage::new(id, text, SourceRef::default())),
            distance,
        )
    }

    fn ids(candidates: &[RetrievalCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.passage.doc_id.as_str()).collect()
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Refund\tPOLICY \n here "), "refund policy here");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_fuzzy_ratio_bounds() {
        assert_eq!(fuzzy_ratio("same text", "SAME   text"), 1.0);
        assert_eq!(fuzzy_ratio("", ""), 1.0);
        assert_eq!(fuzzy_ratio("abc", ""), 0.0);
        assert_eq!(fuzzy_ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_fuzzy_ratio_value() {
        // LCS("abcd", "abed") = 3 -> 6 / 8
        assert!((fuzzy_ratio("abcd", "abed") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzy_ratio_symmetric() {
        let a = "Refunds are issued within 30 days of purchase.";
        let b = "Refunds are issued within 30 days after purchase!";
        assert_eq!(fuzzy_ratio(a, b), fuzzy_ratio(b, a));
    }

    #[test]
    fn test_keeps_better_ranked_duplicate() {
        let dedup = Deduplicator::default();
        let out = dedup.dedup(vec![
            candidate("a", "Refunds are issued within 30 days of purchase.", 0.1),
            candidate("b", "Shipping takes five to seven business days.", 0.2),
            candidate("c", "Refunds are issued within 30 days of a purchase.", 0.3),
        ]);
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_equal_to_threshold_is_kept() {
        // ratio("abcd", "abed") == 0.75, which does not exceed 0.75
        let dedup = Deduplicator::new(0.75);
        let out = dedup.dedup(vec![candidate("a", "abcd", 0.0), candidate("b", "abed", 0.1)]);
        assert_eq!(ids(&out), vec!["a", "b"]);

        let stricter = Deduplicator::new(0.7);
        let out = stricter.dedup(vec![candidate("a", "abcd", 0.0), candidate("b", "abed", 0.1)]);
        assert_eq!(ids(&out), vec!["a"]);
    }

    #[test]
    fn test_idempotent_and_order_preserving() {
        let dedup = Deduplicator::new(0.8);
        let input = vec![
            candidate("1", "the quick brown fox", 0.1),
            candidate("2", "The quick brown fox!", 0.2),
            candidate("3", "lorem ipsum dolor sit amet", 0.3),
            candidate("4", "the quick brown foxes", 0.4),
            candidate("5", "lorem ipsum dolor sit", 0.5),
            candidate("6", "an unrelated sentence", 0.6),
        ];

        let once = dedup.dedup(input.clone());
        let twice = dedup.dedup(once.clone());
        assert_eq!(ids(&once), ids(&twice));

        // Survivors appear in input order
        let positions: Vec<usize> = once
            .iter()
            .map(|c| input.iter().position(|i| i.passage.doc_id == c.passage.doc_id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    /// Quadratic reference LCS.
    fn lcs_table(a: &[char], b: &[char]) -> usize {
        let mut prev = vec![0usize; b.len() + 1];
        for &x in a {
            let mut curr = vec![0usize; b.len() + 1];
            for (j, &y) in b.iter().enumerate() {
                curr[j + 1] = if x == y { prev[j] + 1 } else { curr[j].max(prev[j + 1]) };
            }
            prev = curr;
        }
        prev[b.len()]
    }

    #[test]
    fn test_lcs_matches_table_across_word_boundaries() {
        let fox = "the quick brown fox jumps over the lazy dog ".repeat(5);
        let cat = "the quick brown cat jumps over a lazy dog ".repeat(5);
        let x64 = "x".repeat(64);
        let x65 = "x".repeat(65);
        let texts: [&str; 10] = [
            "",
            "a",
            "abcd",
            "abed",
            "refunds are issued within thirty days of purchase for all orders placed online",
            "refunds are issued within 30 days of a purchase for every order placed online or in store",
            &fox,
            &cat,
            &x64,
            &x65,
        ];
        for a in &texts {
            for b in &texts {
                let a: Vec<char> = a.chars().collect();
                let b: Vec<char> = b.chars().collect();
                assert_eq!(lcs_len(&a, &b), lcs_table(&a, &b));
            }
        }
    }

    #[test]
    fn test_length_bound_agrees_with_ratio() {
        let short: Vec<char> = "refund".chars().collect();
        let long: Vec<char> = "refund policy for damaged goods".chars().collect();
        assert!(ratio_chars(&short, &long) <= 0.9);
        assert!(!ratio_exceeds(&short, &long, 0.9));
        assert!(ratio_exceeds(&short, &short, 0.9));
    }

    #[test]
    fn test_dedup_limited_matches_truncated_dedup() {
        let dedup = Deduplicator::new(0.8);
        let input = vec![
            candidate("1", "the quick brown fox", 0.1),
            candidate("2", "The quick brown fox!", 0.2),
            candidate("3", "lorem ipsum dolor sit amet", 0.3),
            candidate("4", "lorem ipsum dolor sit", 0.4),
            candidate("5", "an unrelated sentence", 0.5),
            candidate("6", "another unrelated line", 0.6),
        ];
        for limit in 0..=6 {
            let mut full = dedup.dedup(input.clone());
            full.truncate(limit);
            assert_eq!(ids(&dedup.dedup_limited(input.clone(), limit)), ids(&full));
        }
    }

    #[test]
    fn test_long_passages_compare_on_prefix() {
        let prefix = "shared opening paragraph of a long policy document ".repeat(50);
        let a = format!("{prefix}{}", "tail one ".repeat(500));
        let b = format!("{prefix}{}", "something else entirely ".repeat(500));
        assert!(normalize_text(&prefix).chars().count() >= MAX_COMPARED_CHARS);
        assert_eq!(fuzzy_ratio(&a, &b), 1.0);
        assert!(Deduplicator::default().is_duplicate(&a, &b));
    }

    #[test]
    fn test_empty_input() {
        assert!(Deduplicator::default().dedup(Vec::new()).is_empty());
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(Deduplicator::new(1.5).threshold(), 1.0);
        assert_eq!(Deduplicator::new(-0.5).threshold(), 0.0);
    }
}
