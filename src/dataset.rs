//! Dataset ingestion and the in-memory index.
//!
//! The remote document is `{ artistKey: { albumKey: { artistName, releaseTitle,
//! genres[], secondaryGenres[], descriptors[] } } }`. Parsing validates each
//! release against `DatasetRecord`'s schema; the index then groups releases
//! under every normalized spelling of their artist name.

use std::hash::Hasher;

use log::{debug, warn};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::models::DatasetRecord;
use crate::normalize::{artist_keys, title_keys};

// ============================================================================
// Parsing
// ============================================================================

/// How to treat releases that fail the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Any invalid release fails the whole load
    Strict,
    /// Invalid releases are skipped and counted
    Permissive,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelease {
    artist_name: String,
    release_title: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    secondary_genres: Vec<String>,
    #[serde(default)]
    descriptors: Vec<String>,
}

/// Parsed dataset document.
#[derive(Debug, Default)]
pub struct ParsedDataset {
    pub records: Vec<DatasetRecord>,
    /// Releases (or whole artist entries) rejected in permissive mode
    pub quarantined: usize,
}

fn release_from_value(
    artist_key: &str,
    album_key: &str,
    value: serde_json::Value,
) -> std::result::Result<DatasetRecord, String> {
    let raw: RawRelease = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if raw.artist_name.trim().is_empty() || raw.release_title.trim().is_empty() {
        return Err("empty artistName or releaseTitle".to_string());
    }
    Ok(DatasetRecord {
        artist_key: artist_key.to_string(),
        album_key: album_key.to_string(),
        artist_name: raw.artist_name,
        release_title: raw.release_title,
        genres: raw.genres,
        secondary_genres: raw.secondary_genres,
        descriptors: raw.descriptors,
    })
}

/// Parse the dataset document.
///
/// A document that is not a JSON object is malformed in both modes. Record
/// order follows the (sorted) source keys, so it is stable for a given body.
pub fn parse_dataset(body: &str, mode: ParseMode) -> Result<ParsedDataset> {
    let document: serde_json::Value =
        serde_json::from_str(body).map_err(|e| Error::DatasetMalformed(e.to_string()))?;
    let serde_json::Value::Object(artists) = document else {
        return Err(Error::DatasetMalformed("top-level value is not an object".to_string()));
    };

    let mut parsed = ParsedDataset::default();
    for (artist_key, albums) in artists {
        let serde_json::Value::Object(albums) = albums else {
            if mode == ParseMode::Strict {
                return Err(Error::DatasetMalformed(format!("artist entry '{}' is not an object", artist_key)));
            }
            debug!("Quarantined artist entry '{}': not an object", artist_key);
            parsed.quarantined += 1;
            continue;
        };
        for (album_key, value) in albums {
            match release_from_value(&artist_key, &album_key, value) {
                Ok(record) => parsed.records.push(record),
                Err(reason) if mode == ParseMode::Strict => {
                    return Err(Error::DatasetMalformed(format!(
                        "release '{}/{}': {}",
                        artist_key, album_key, reason
                    )));
                }
                Err(reason) => {
                    debug!("Quarantined release '{}/{}': {}", artist_key, album_key, reason);
                    parsed.quarantined += 1;
                }
            }
        }
    }

    if parsed.quarantined > 0 {
        warn!(
            "Skipped {} dataset entries that failed the record schema ({} releases kept)",
            parsed.quarantined,
            parsed.records.len()
        );
    }
    Ok(parsed)
}

/// Stable identifier for a dataset body (FxHash of the bytes, hex).
pub fn snapshot_id(body: &str) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(body.as_bytes());
    format!("{:016x}", hasher.finish())
}

// ============================================================================
// Snapshot
// ============================================================================

/// A release together with its precomputed normalized keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub record: DatasetRecord,
    /// Normalized artist spellings, primary first
    pub artist_keys: Vec<String>,
    /// Normalized title spellings, primary first
    pub title_keys: Vec<String>,
}

impl IndexedRecord {
    pub fn new(record: DatasetRecord) -> Self {
        let artist_keys = artist_keys(&record.artist_name);
        let title_keys = title_keys(&record.release_title);
        Self {
            record,
            artist_keys,
            title_keys,
        }
    }

    /// Primary normalized title, used for tie-breaks.
    pub fn title_key(&self) -> &str {
        self.title_keys.first().map(String::as_str).unwrap_or("")
    }
}

/// Everything needed to rebuild the index without re-normalizing.
/// This is what the dataset cache namespace stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub id: String,
    pub source: String,
    /// Unix seconds when the body was fetched
    pub fetched_at: i64,
    pub records: Vec<IndexedRecord>,
    pub quarantined: usize,
}

impl DatasetSnapshot {
    /// Parse a fetched body and normalize every release in parallel.
    pub fn from_body(source: &str, body: &str, mode: ParseMode, fetched_at: i64) -> Result<Self> {
        let parsed = parse_dataset(body, mode)?;
        let records: Vec<IndexedRecord> = parsed.records.into_par_iter().map(IndexedRecord::new).collect();
        Ok(Self {
            id: snapshot_id(body),
            source: source.to_string(),
            fetched_at,
            records,
            quarantined: parsed.quarantined,
        })
    }
}

// ============================================================================
// Index
// ============================================================================

/// Lookup structure over one snapshot: normalized artist key → releases.
#[derive(Debug)]
pub struct DatasetIndex {
    snapshot: DatasetSnapshot,
    by_artist: FxHashMap<String, Vec<usize>>,
}

impl DatasetIndex {
    pub fn new(snapshot: DatasetSnapshot) -> Self {
        let mut by_artist: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (idx, indexed) in snapshot.records.iter().enumerate() {
            for key in &indexed.artist_keys {
                if key.is_empty() {
                    continue;
                }
                let slot = by_artist.entry(key.clone()).or_default();
                if slot.last() != Some(&idx) {
                    slot.push(idx);
                }
            }
        }
        Self { snapshot, by_artist }
    }

    /// An index with no releases (every query yields no candidates).
    pub fn empty(source: &str) -> Self {
        Self::new(DatasetSnapshot {
            id: snapshot_id(""),
            source: source.to_string(),
            fetched_at: 0,
            records: Vec::new(),
            quarantined: 0,
        })
    }

    pub fn snapshot(&self) -> &DatasetSnapshot {
        &self.snapshot
    }

    pub fn snapshot_id(&self) -> &str {
        &self.snapshot.id
    }

    pub fn fetched_at(&self) -> i64 {
        self.snapshot.fetched_at
    }

    pub fn len(&self) -> usize {
        self.snapshot.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.records.is_empty()
    }

    pub fn artist_count(&self) -> usize {
        self.by_artist.len()
    }

    pub fn get(&self, idx: usize) -> Option<&IndexedRecord> {
        self.snapshot.records.get(idx)
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.snapshot.records
    }

    /// Positions of releases filed under a normalized artist key.
    pub fn candidate_indices(&self, key: &str) -> &[usize] {
        self.by_artist.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Releases filed under a normalized artist key.
    pub fn candidates_for_artist(&self, key: &str) -> Vec<&DatasetRecord> {
        self.candidate_indices(key)
            .iter()
            .filter_map(|&idx| self.get(idx).map(|indexed| &indexed.record))
            .collect()
    }

    /// Every artist key in the index (unordered).
    pub fn artist_keys(&self) -> impl Iterator<Item = &str> {
        self.by_artist.keys().map(String::as_str)
    }
}
