//! Candidate scoring and match selection.
//!
//! Flow for one query:
//! 1. Normalize the query artist/album into their key variations
//! 2. Gather candidates filed under any query artist key; if there are none,
//!    broaden to artist keys that are similar enough (bounded)
//! 3. Score every candidate (artist similarity, title similarity, mean)
//! 4. Select by combined score, else fall back to title-only flexible matching
//!
//! Selection is a pure function of the index contents and the config.

use log::debug;
use rustc_hash::FxHashSet;

use crate::config::Config;
use crate::dataset::{DatasetIndex, IndexedRecord};
use crate::models::{MatchQuery, MatchResult, MatchedBy};
use crate::normalize::{artist_keys, title_keys};
use crate::scoring::{
    best_similarity, clears, combined_score, rank_by_combined, rank_by_title, token_sort_ratio,
    ScoredCandidate,
};

/// Normalized key variations of a query.
#[derive(Debug, Clone)]
pub struct QueryKeys {
    pub artist: Vec<String>,
    pub title: Vec<String>,
}

impl QueryKeys {
    pub fn new(query: &MatchQuery) -> Self {
        Self {
            artist: artist_keys(&query.artist),
            title: title_keys(&query.album),
        }
    }
}

fn score_record(idx: usize, indexed: &IndexedRecord, keys: &QueryKeys) -> ScoredCandidate {
    let artist_similarity = best_similarity(&keys.artist, &indexed.artist_keys);
    let title_similarity = best_similarity(&keys.title, &indexed.title_keys);
    ScoredCandidate {
        index: idx,
        artist_similarity,
        title_similarity,
        combined: combined_score(artist_similarity, title_similarity),
        title_key: indexed.title_key().to_string(),
        source_key: (indexed.record.artist_key.clone(), indexed.record.album_key.clone()),
    }
}

/// Artist keys similar to the query artist, best first, at most `max_fallback_artists`.
fn fallback_artist_keys<'a>(index: &'a DatasetIndex, keys: &QueryKeys, config: &Config) -> Vec<&'a str> {
    let mut hits: Vec<(f64, &str)> = index
        .artist_keys()
        .filter_map(|candidate| {
            let similarity = keys
                .artist
                .iter()
                .map(|q| token_sort_ratio(q, candidate))
                .fold(0.0, f64::max);
            clears(similarity, config.similarity_threshold).then_some((similarity, candidate))
        })
        .collect();
    hits.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    hits.truncate(config.max_fallback_artists);
    hits.into_iter().map(|(_, key)| key).collect()
}

fn extend_candidates(index: &DatasetIndex, artist_key: &str, seen: &mut FxHashSet<usize>, out: &mut Vec<usize>) {
    for &idx in index.candidate_indices(artist_key) {
        if seen.insert(idx) {
            out.push(idx);
        }
    }
}

/// Positions of every record the query should be scored against.
pub fn gather_candidates(index: &DatasetIndex, keys: &QueryKeys, config: &Config) -> Vec<usize> {
    let mut seen: FxHashSet<usize> = FxHashSet::default();
    let mut out = Vec::new();

    for key in keys.artist.iter().filter(|k| !k.is_empty()) {
        extend_candidates(index, key, &mut seen, &mut out);
    }
    if out.is_empty() && config.max_fallback_artists > 0 {
        let broadened = fallback_artist_keys(index, keys, config);
        if !broadened.is_empty() {
            debug!("No artist key for {:?}; broadened to {:?}", keys.artist, broadened);
        }
        for key in broadened {
            extend_candidates(index, key, &mut seen, &mut out);
        }
    }
    out
}

/// Score each candidate position against the query.
pub fn score_candidates(index: &DatasetIndex, candidates: &[usize], keys: &QueryKeys) -> Vec<ScoredCandidate> {
    candidates
        .iter()
        .filter_map(|&idx| index.get(idx).map(|indexed| score_record(idx, indexed, keys)))
        .collect()
}

/// Pick the winning candidate, if any clears a threshold.
///
/// The best candidate by combined score wins when it reaches
/// `similarity_threshold`. Otherwise, with flexible matching enabled, the
/// best candidate by title similarity wins when its title alone reaches
/// `title_match_threshold`.
pub fn select_best(scored: &[ScoredCandidate], config: &Config) -> Option<(ScoredCandidate, MatchedBy)> {
    let best = scored.iter().min_by(|a, b| rank_by_combined(a, b))?;
    if clears(best.combined, config.similarity_threshold) {
        let matched_by = if best.is_exact() {
            MatchedBy::Exact
        } else {
            MatchedBy::ArtistAndAlbumSimilarity
        };
        return Some((best.clone(), matched_by));
    }
    if !config.flexible_artist_matching {
        return None;
    }
    select_flexible(scored, config)
}

fn select_flexible(scored: &[ScoredCandidate], config: &Config) -> Option<(ScoredCandidate, MatchedBy)> {
    scored
        .iter()
        .filter(|c| clears(c.title_similarity, config.title_match_threshold))
        .min_by(|a, b| rank_by_title(a, b))
        .map(|c| (c.clone(), MatchedBy::FlexibleTitle))
}

/// Title-only scan over the whole index for the flexible path.
///
/// Sequential: this runs inside the engine's per-key single-flight, often on a
/// re-tag worker, and a nested rayon join could steal a job that waits on
/// another in-flight key.
fn scan_titles(index: &DatasetIndex, keys: &QueryKeys, config: &Config) -> Option<(ScoredCandidate, MatchedBy)> {
    let scored: Vec<ScoredCandidate> = index
        .records()
        .iter()
        .enumerate()
        .filter(|(_, indexed)| {
            clears(best_similarity(&keys.title, &indexed.title_keys), config.title_match_threshold)
        })
        .map(|(idx, indexed)| score_record(idx, indexed, keys))
        .collect();
    select_flexible(&scored, config)
}

fn to_result(index: &DatasetIndex, winner: ScoredCandidate, matched_by: MatchedBy) -> Option<MatchResult> {
    let record = index.get(winner.index)?.record.clone();
    let score = if matched_by == MatchedBy::Exact {
        1.0
    } else {
        winner.combined.clamp(0.0, 1.0)
    };
    Some(MatchResult {
        record,
        score,
        matched_by,
        artist_similarity: winner.artist_similarity,
        title_similarity: winner.title_similarity,
    })
}

/// Resolve a query against the index. `None` means no match.
pub fn find_match(index: &DatasetIndex, query: &MatchQuery, config: &Config) -> Option<MatchResult> {
    if index.is_empty() {
        return None;
    }
    let keys = QueryKeys::new(query);
    let candidates = gather_candidates(index, &keys, config);
    let scored = score_candidates(index, &candidates, &keys);
    for c in &scored {
        debug!(
            "  candidate {}/{}: artist={:.3} title={:.3} combined={:.3}",
            c.source_key.0, c.source_key.1, c.artist_similarity, c.title_similarity, c.combined
        );
    }

    let selected = select_best(&scored, config).or_else(|| {
        if config.flexible_artist_matching {
            scan_titles(index, &keys, config)
        } else {
            None
        }
    });

    let (winner, matched_by) = selected?;
    debug!(
        "Matched '{} - {}' by {} (score {:.3})",
        query.artist,
        query.album,
        matched_by.as_str(),
        winner.combined
    );
    to_result(index, winner, matched_by)
}
