//! Error taxonomy for the matching engine.

use thiserror::Error;

/// Result type used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors.
///
/// Payloads are stringly so the type stays `Clone`: a single failed dataset
/// load is handed to every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Remote fetch or transport failure
    #[error("dataset unavailable: {0}")]
    DatasetUnavailable(String),

    /// Dataset document could not be parsed or failed the record schema
    #[error("dataset malformed: {0}")]
    DatasetMalformed(String),

    /// No dataset record cleared the thresholds (only raised when a match is required)
    #[error("no RYM match for {artist} - {album}")]
    NoMatch { artist: String, album: String },

    /// Genre tree or exclusion list missing/malformed at startup
    #[error("genre hierarchy load failed: {0}")]
    HierarchyLoad(String),

    /// Durable cache or library store failure
    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// True for the two dataset-load failures that may fall back to a stale snapshot.
    pub fn is_dataset_failure(&self) -> bool {
        matches!(self, Error::DatasetUnavailable(_) | Error::DatasetMalformed(_))
    }
}
