//! Scoring functions for RYM matching.
//!
//! This module contains:
//! - The string similarity metric (token-sort ratio over normalized keys)
//! - The combined artist/title score
//! - The candidate orderings used for selection and tie-breaks
//!
//! The formulas here are part of the matching contract. Changing them changes
//! which release every library album resolves to.

use std::cmp::Ordering;

// ============================================================================
// Constants
// ============================================================================

/// Scores closer than this are ties; thresholds are checked with this slack.
pub const SCORE_EPSILON: f64 = 1e-9;

// ============================================================================
// Similarity
// ============================================================================

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Token-sort ratio between two normalized keys (0.0 to 1.0).
///
/// Tokens of each side are sorted and re-joined, then compared with the
/// normalized Levenshtein similarity. Word order therefore does not matter:
/// "road abbey" vs "abbey road" is 1.0. Two empty keys are identical (1.0);
/// one empty key scores 0.0.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b)).clamp(0.0, 1.0)
}

/// Best similarity across every pairing of two key variation lists.
pub fn best_similarity(left: &[String], right: &[String]) -> f64 {
    let mut best: f64 = 0.0;
    for l in left {
        for r in right {
            let similarity = token_sort_ratio(l, r);
            if similarity > best {
                best = similarity;
                if best >= 1.0 {
                    return 1.0;
                }
            }
        }
    }
    best
}

/// Combined score: unweighted mean of artist and title similarity.
pub fn combined_score(artist_similarity: f64, title_similarity: f64) -> f64 {
    (artist_similarity + title_similarity) / 2.0
}

/// Threshold check. A score exactly at the threshold passes.
pub fn clears(score: f64, threshold: f64) -> bool {
    score + SCORE_EPSILON >= threshold
}

/// Score on a grid of `SCORE_EPSILON` steps.
fn quantize(score: f64) -> i64 {
    (score / SCORE_EPSILON).round() as i64
}

/// Scores are compared on the quantized grid rather than with `|a - b| <= ε`,
/// which is not transitive and would make `min_by` depend on input order.
fn cmp_score(a: f64, b: f64) -> Ordering {
    quantize(a).cmp(&quantize(b))
}

// ============================================================================
// Candidate Ordering
// ============================================================================

/// A dataset record scored against one query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    /// Position of the record in the dataset index
    pub index: usize,
    pub artist_similarity: f64,
    pub title_similarity: f64,
    pub combined: f64,
    /// Primary normalized release title of the record
    pub title_key: String,
    /// (artist_key, album_key) from the source document
    pub source_key: (String, String),
}

impl ScoredCandidate {
    /// Both similarities are 1.0 through some key variation. A query credited
    /// to "Drake feat. Rihanna" is exact against a "Drake" release, because
    /// the primary-artist variation is identical.
    pub fn is_exact(&self) -> bool {
        self.artist_similarity >= 1.0 && self.title_similarity >= 1.0
    }
}

/// Selection order: higher combined score, then higher title similarity,
/// then smaller normalized title, then smaller source key.
/// `Ordering::Less` means `a` ranks ahead of `b`.
pub fn rank_by_combined(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    cmp_score(b.combined, a.combined)
        .then_with(|| cmp_score(b.title_similarity, a.title_similarity))
        .then_with(|| a.title_key.cmp(&b.title_key))
        .then_with(|| a.source_key.cmp(&b.source_key))
}

/// Flexible-match order: higher title similarity, then higher combined score,
/// then smaller normalized title, then smaller source key.
pub fn rank_by_title(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    cmp_score(b.title_similarity, a.title_similarity)
        .then_with(|| cmp_score(b.combined, a.combined))
        .then_with(|| a.title_key.cmp(&b.title_key))
        .then_with(|| a.source_key.cmp(&b.source_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize, artist: f64, title: f64, title_key: &str) -> ScoredCandidate {
        ScoredCandidate {
            index,
            artist_similarity: artist,
            title_similarity: title,
            combined: combined_score(artist, title),
            title_key: title_key.to_string(),
            source_key: (format!("a{}", index), format!("b{}", index)),
        }
    }

    #[test]
    fn test_token_sort_ratio() {
        assert_eq!(token_sort_ratio("abbey road", "abbey road"), 1.0);
        assert_eq!(token_sort_ratio("road abbey", "abbey road"), 1.0);
        assert_eq!(token_sort_ratio("", ""), 1.0);
        assert_eq!(token_sort_ratio("abbey road", ""), 0.0);
        let close = token_sort_ratio("abbey road", "abbey raod");
        assert!(close > 0.7 && close < 1.0);
        assert!(token_sort_ratio("beatles", "metallica") < 0.5);
    }

    #[test]
    fn test_best_similarity_uses_variations() {
        let query = vec!["kino kino".to_string(), "kino".to_string()];
        let record = vec!["kino".to_string()];
        assert_eq!(best_similarity(&query, &record), 1.0);
        assert_eq!(best_similarity(&[], &record), 0.0);
    }

    #[test]
    fn test_clears_boundary() {
        assert!(clears(0.8, 0.8));
        assert!(clears(combined_score(0.7, 0.9), 0.8));
        assert!(!clears(0.7999, 0.8));
    }

    #[test]
    fn test_rank_by_combined_tiebreaks() {
        // Higher combined wins
        let a = candidate(0, 0.9, 0.9, "x");
        let b = candidate(1, 0.8, 0.8, "a");
        assert_eq!(rank_by_combined(&a, &b), Ordering::Less);

        // Same combined: higher title similarity wins
        let a = candidate(0, 1.0, 0.8, "a");
        let b = candidate(1, 0.8, 1.0, "z");
        assert_eq!(rank_by_combined(&a, &b), Ordering::Greater);

        // Same scores: smaller title key wins
        let a = candidate(0, 0.9, 0.9, "beta");
        let b = candidate(1, 0.9, 0.9, "alpha");
        assert_eq!(rank_by_combined(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_rank_by_title() {
        let a = candidate(0, 0.1, 0.97, "x");
        let b = candidate(1, 0.9, 0.96, "x");
        assert_eq!(rank_by_title(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_near_equal_scores_rank_independent_of_order() {
        // Pairwise within epsilon of each other, but not all three.
        let mut items = vec![
            candidate(0, 0.5, 0.5, "c"),
            candidate(1, 0.5, 0.5, "b"),
            candidate(2, 0.5, 0.5, "a"),
        ];
        items[1].combined += 0.6e-9;
        items[2].combined += 1.2e-9;

        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        let winners: Vec<usize> = orders
            .iter()
            .map(|order| {
                order
                    .iter()
                    .map(|&i| &items[i])
                    .min_by(|a, b| rank_by_combined(a, b))
                    .unwrap()
                    .index
            })
            .collect();
        assert!(winners.iter().all(|&w| w == winners[0]), "winners: {:?}", winners);
    }
}
