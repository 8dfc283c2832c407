//! Core data models for RYM matching.
//!
//! This module contains the dataset record schema, the match query/result
//! types, and run statistics shared by the import hook and re-tag command.

use serde::{Deserialize, Serialize};

// ============================================================================
// Dataset Models
// ============================================================================

/// One release from the RYM dataset.
///
/// `artist_key`/`album_key` are the opaque keys the release was stored under
/// in the source document; they only serve as the last deterministic tie-break.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub artist_key: String,
    pub album_key: String,
    pub artist_name: String,
    pub release_title: String,
    pub genres: Vec<String>,
    pub secondary_genres: Vec<String>,
    pub descriptors: Vec<String>,
}

// ============================================================================
// Match Models
// ============================================================================

/// Artist/album pair to resolve, as entered on the host record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchQuery {
    pub artist: String,
    pub album: String,
}

impl MatchQuery {
    pub fn new(artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
        }
    }
}

/// How a match was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchedBy {
    /// Artist and title both identical after normalization, through any key
    /// variation (bracket/paren stripped forms, the primary credited artist)
    Exact,
    /// Combined artist/title similarity cleared `similarity_threshold`
    ArtistAndAlbumSimilarity,
    /// Title alone cleared `title_match_threshold` (artist alias / collaboration credit)
    FlexibleTitle,
}

impl MatchedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchedBy::Exact => "exact",
            MatchedBy::ArtistAndAlbumSimilarity => "similarity",
            MatchedBy::FlexibleTitle => "flexible-title",
        }
    }
}

/// Accepted match for a query.
///
/// Invariants: `score` lies in [0, 1]; `matched_by == Exact` implies `score == 1.0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub record: DatasetRecord,
    /// Combined score: mean of artist and title similarity
    pub score: f64,
    pub matched_by: MatchedBy,
    pub artist_similarity: f64,
    pub title_similarity: f64,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Counters for an import session or re-tag run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub updated: usize,
    pub skipped_up_to_date: usize,
    pub missing: usize,
    pub blocked: usize,

    // Match methods
    pub exact_matches: usize,
    pub similarity_matches: usize,
    pub flexible_matches: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    pub fn record_match(&mut self, result: &MatchResult) {
        match result.matched_by {
            MatchedBy::Exact => self.exact_matches += 1,
            MatchedBy::ArtistAndAlbumSimilarity => self.similarity_matches += 1,
            MatchedBy::FlexibleTitle => self.flexible_matches += 1,
        }
    }

    pub fn total_matches(&self) -> usize {
        self.exact_matches + self.similarity_matches + self.flexible_matches
    }

    /// Match rate as a percentage of processed records
    pub fn match_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            100.0 * self.total_matches() as f64 / self.processed as f64
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DatasetRecord {
        DatasetRecord {
            artist_key: "beatles".into(),
            album_key: "abbey-road".into(),
            artist_name: "Beatles".into(),
            release_title: "Abbey Road".into(),
            genres: vec!["Pop Rock".into()],
            secondary_genres: vec![],
            descriptors: vec!["melodic".into()],
        }
    }

    #[test]
    fn test_matched_by_serializes_screaming() {
        let json = serde_json::to_string(&MatchedBy::FlexibleTitle).unwrap();
        assert_eq!(json, "\"FLEXIBLE_TITLE\"");
    }

    #[test]
    fn test_match_rate() {
        let mut stats = RunStats {
            processed: 4,
            ..Default::default()
        };
        let result = MatchResult {
            record: record(),
            score: 1.0,
            matched_by: MatchedBy::Exact,
            artist_similarity: 1.0,
            title_similarity: 1.0,
        };
        stats.record_match(&result);
        assert_eq!(stats.total_matches(), 1);
        assert!((stats.match_rate() - 25.0).abs() < 1e-9);
        assert_eq!(RunStats::default().match_rate(), 0.0);
    }
}
