//! Safety checks before the cache database is deleted and recreated.
//!
//! The cache is rebuilt from scratch on a schema mismatch. These checks make
//! sure that path really is a cache file and never the music library.

use std::path::Path;

use crate::errors::{Error, Result};

/// File names that belong to the host library and must never be reset.
const PROTECTED_NAMES: [&str; 2] = ["library.db", "musiclibrary.db"];

/// Validates that a database path is safe to delete.
///
/// Checks:
/// - File name must contain the required pattern (e.g. "cache")
/// - Path cannot be any of the protected paths (the configured library)
/// - File name cannot be a well-known library database name
pub fn validate_reset_path(path: &Path, required_pattern: &str, protected_paths: &[&Path]) -> Result<()> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !name.contains(required_pattern) {
        return Err(Error::Store(format!(
            "Safety check failed: '{}' must contain '{}' in the name before it can be reset",
            path.display(),
            required_pattern
        )));
    }

    for protected in protected_paths {
        if path == *protected {
            return Err(Error::Store(format!(
                "Safety check failed: '{}' is the library database",
                path.display()
            )));
        }
    }

    if PROTECTED_NAMES.contains(&name) {
        return Err(Error::Store(format!(
            "Safety check failed: '{}' looks like a library database",
            path.display()
        )));
    }

    Ok(())
}
