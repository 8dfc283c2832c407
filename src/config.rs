//! Configuration model, defaults, and TOML loading.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use rustc_hash::FxHasher;

use crate::dataset::ParseMode;
use crate::errors::{Error, Result};

/// Root configuration, read from `config.toml`.
///
/// Every field has a default so a partial file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Endpoint returning the RYM dataset document. A local path or
    /// `file://` URL is read from disk instead.
    pub dataset_url: String,
    pub parse_mode: ParseMode,

    // Matching
    pub similarity_threshold: f64,
    pub title_match_threshold: f64,
    pub flexible_artist_matching: bool,
    /// Cap on artist keys considered when the exact artist lookup finds nothing
    pub max_fallback_artists: usize,

    // Tag projection caps (0 disables the field)
    pub max_genres: usize,
    pub max_styles: usize,
    pub max_moods: usize,
    pub max_groupings: usize,

    // Hierarchy
    pub use_hierarchy: bool,
    pub max_hierarchy_depth: usize,
    pub genre_tree_file: PathBuf,
    pub excluded_genres_file: PathBuf,

    // Import behaviour
    pub require_rym_match: bool,
    pub log_missing_matches: bool,
    pub missing_matches_logfile: PathBuf,

    // Cache (seconds)
    pub cache_duration: u64,
    pub cache_file: PathBuf,
    /// Host library database; never touched by cache resets
    pub library_file: PathBuf,
    /// Minimum wait before re-fetching after falling back to a stale snapshot
    pub dataset_retry_interval: u64,

    // Transport
    pub fetch_retries: u32,
    pub fetch_timeout_secs: u64,

    /// Re-tag worker threads (0 = one per core)
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_url: String::new(),
            parse_mode: ParseMode::Permissive,
            similarity_threshold: 0.8,
            title_match_threshold: 0.95,
            flexible_artist_matching: true,
            max_fallback_artists: 25,
            max_genres: 10,
            max_styles: 20,
            max_moods: 60,
            max_groupings: 30,
            use_hierarchy: true,
            max_hierarchy_depth: 16,
            genre_tree_file: PathBuf::from("data/rym-genre-tree.json"),
            excluded_genres_file: PathBuf::from("data/excluded-meta-genres.json"),
            require_rym_match: false,
            log_missing_matches: true,
            missing_matches_logfile: PathBuf::from("rym_missing_matches.log"),
            cache_duration: 3600,
            cache_file: PathBuf::from("rym_genres_cache.sqlite3"),
            library_file: PathBuf::from("library.db"),
            dataset_retry_interval: 300,
            fetch_retries: 3,
            fetch_timeout_secs: 30,
            workers: 0,
        }
    }
}

impl Config {
    /// Load from a TOML file and validate. Relative data paths are resolved
    /// against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("title_match_threshold", self.title_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.cache_duration == 0 {
            return Err(Error::Config("cache_duration must be positive".to_string()));
        }
        Ok(())
    }

    /// Hash of the settings that decide which release a query resolves to.
    /// Cached match results are only reused under the same fingerprint.
    pub fn match_fingerprint(&self) -> String {
        let mut hasher = FxHasher::default();
        self.similarity_threshold.to_bits().hash(&mut hasher);
        self.title_match_threshold.to_bits().hash(&mut hasher);
        self.flexible_artist_matching.hash(&mut hasher);
        self.max_fallback_artists.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Resolve relative data paths against the directory holding the config file.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.genre_tree_file,
            &mut self.excluded_genres_file,
            &mut self.missing_matches_logfile,
            &mut self.cache_file,
            &mut self.library_file,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
