//! Projection of an enrichment onto the host record's tag fields.
//!
//! | field      | source             | cap             |
//! |------------|--------------------|-----------------|
//! | `genre`    | `genres`           | `max_genres`    |
//! | `style`    | `secondaryGenres`  | `max_styles`    |
//! | `mood`     | `descriptors`      | `max_moods`     |
//! | `grouping` | hierarchy ancestors| `max_groupings` |
//!
//! A cap of 0 leaves the field empty. Multi-valued fields are stored as one
//! string joined with `"; "`.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::Enrichment;

pub const TAG_SEPARATOR: &str = "; ";

fn capped(values: &[String], cap: usize) -> Vec<String> {
    values.iter().take(cap).cloned().collect()
}

/// Split a stored tag string back into values.
pub fn split_tag(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Typed tag values for one record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub genre: Vec<String>,
    pub style: Vec<String>,
    pub mood: Vec<String>,
    pub grouping: Vec<String>,
}

/// Tag values as stored on the host record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStrings {
    pub genre: String,
    pub style: String,
    pub mood: String,
    pub grouping: String,
}

impl TagSet {
    pub fn project(enrichment: &Enrichment, config: &Config) -> Self {
        let record = &enrichment.result.record;
        Self {
            genre: capped(&record.genres, config.max_genres),
            style: capped(&record.secondary_genres, config.max_styles),
            mood: capped(&record.descriptors, config.max_moods),
            grouping: capped(&enrichment.groupings, config.max_groupings),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genre.is_empty() && self.style.is_empty() && self.mood.is_empty() && self.grouping.is_empty()
    }

    pub fn to_strings(&self) -> TagStrings {
        TagStrings {
            genre: self.genre.join(TAG_SEPARATOR),
            style: self.style.join(TAG_SEPARATOR),
            mood: self.mood.join(TAG_SEPARATOR),
            grouping: self.grouping.join(TAG_SEPARATOR),
        }
    }

    /// (label, values) pairs for display.
    pub fn fields(&self) -> [(&'static str, &[String]); 4] {
        [
            ("Genres", self.genre.as_slice()),
            ("Styles", self.style.as_slice()),
            ("Moods", self.mood.as_slice()),
            ("Groupings", self.grouping.as_slice()),
        ]
    }
}

impl TagStrings {
    pub fn to_tags(&self) -> TagSet {
        TagSet {
            genre: split_tag(&self.genre),
            style: split_tag(&self.style),
            mood: split_tag(&self.mood),
            grouping: split_tag(&self.grouping),
        }
    }
}
