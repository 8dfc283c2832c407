//! Host-facing workflows: the per-album import hook and the manual re-tag run.
//!
//! Re-tag pipeline:
//! 1. Read the filtered albums from the library
//! 2. Match + project in parallel on a bounded rayon pool
//! 3. Stream updates over a channel to a single library writer (batched)
//! 4. Append unmatched albums to the missing-match log

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use crossbeam_channel::bounded;
use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::engine::{Engine, Enrichment};
use crate::errors::{Error, Result};
use crate::library::{AlbumFilter, AlbumRecord, Library};
use crate::models::{MatchQuery, RunStats};
use crate::progress::{format_duration, with_spinner, AlbumOutcome, RetagProgress};
use crate::projector::{TagSet, TagStrings};

const WRITE_BATCH_SIZE: usize = 500;

// ============================================================================
// Missing-match log
// ============================================================================

/// Appends "timestamp: artist - album" lines for unmatched albums, each pair
/// at most once per process.
pub struct MissingMatchLog {
    path: PathBuf,
    seen: Mutex<FxHashSet<(String, String)>>,
}

impl MissingMatchLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if a line was written.
    pub fn record(&self, artist: &str, album: &str) -> Result<bool> {
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| Error::Io("missing-match log lock poisoned".to_string()))?;
            if !seen.insert((artist.to_string(), album.to_string())) {
                return Ok(false);
            }
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "{}: {} - {}", timestamp, artist, album)?;
        Ok(true)
    }
}

// ============================================================================
// Import hook
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum ImportOutcome {
    Tagged { enrichment: Box<Enrichment>, tags: TagSet },
    /// Proceeds without RYM tags
    Untagged,
}

/// Per-album import step. With `require_rym_match`, a missing match (or no
/// usable dataset) is returned as an error and the import must not proceed.
pub struct ImportHook<'a> {
    engine: &'a Engine,
    missing_log: Option<MissingMatchLog>,
}

impl<'a> ImportHook<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        let config = engine.config();
        let missing_log = config
            .log_missing_matches
            .then(|| MissingMatchLog::new(config.missing_matches_logfile.clone()));
        Self { engine, missing_log }
    }

    fn log_missing(&self, artist: &str, album: &str) {
        if let Some(log) = &self.missing_log {
            if let Err(e) = log.record(artist, album) {
                warn!("Could not write to {}: {}", log.path().display(), e);
            }
        }
    }

    pub fn on_import(&self, artist: &str, album: &str) -> Result<ImportOutcome> {
        let config = self.engine.config();
        let query = MatchQuery::new(artist, album);
        let enrichment = match self.engine.enrich(&query) {
            Ok(enrichment) => enrichment,
            Err(e) if e.is_dataset_failure() && !config.require_rym_match => {
                warn!("Importing {} - {} without RYM tags: {}", artist, album, e);
                return Ok(ImportOutcome::Untagged);
            }
            Err(e) => return Err(e),
        };

        match enrichment {
            Some(enrichment) => {
                let tags = TagSet::project(&enrichment, config);
                info!(
                    "RYM match for {} - {} ({}, score {:.3})",
                    artist,
                    album,
                    enrichment.result.matched_by.as_str(),
                    enrichment.result.score
                );
                Ok(ImportOutcome::Tagged {
                    enrichment: Box::new(enrichment),
                    tags,
                })
            }
            None => {
                self.log_missing(artist, album);
                if config.require_rym_match {
                    info!("No RYM match, stopping import: {} - {}", artist, album);
                    Err(Error::NoMatch {
                        artist: artist.to_string(),
                        album: album.to_string(),
                    })
                } else {
                    info!("No RYM match found: {} - {}", artist, album);
                    Ok(ImportOutcome::Untagged)
                }
            }
        }
    }

    /// Run the hook and, unless blocked, add the album to the library.
    pub fn import_into(&self, library: &mut Library, artist: &str, album: &str) -> Result<(i64, ImportOutcome)> {
        let outcome = self.on_import(artist, album)?;
        let id = library.add_album(artist, album)?;
        if let ImportOutcome::Tagged { tags, .. } = &outcome {
            library.store_tags(id, &tags.to_strings())?;
        }
        Ok((id, outcome))
    }
}

// ============================================================================
// Re-tag
// ============================================================================

enum RetagEvent {
    Updated { id: i64, label: String, tags: TagStrings, enrichment: Box<Enrichment> },
    UpToDate { label: String },
    Missing { artist: String, album: String },
    Failed { label: String, error: Error },
}

fn album_label(album: &AlbumRecord) -> String {
    format!("{} - {}", album.albumartist, album.album)
}

fn retag_one(engine: &Engine, album: &AlbumRecord, force: bool) -> RetagEvent {
    let label = album_label(album);
    let query = MatchQuery::new(album.albumartist.as_str(), album.album.as_str());
    match engine.enrich(&query) {
        Ok(Some(enrichment)) => {
            let tags = TagSet::project(&enrichment, engine.config()).to_strings();
            if !force && tags == album.tags {
                RetagEvent::UpToDate { label }
            } else {
                RetagEvent::Updated {
                    id: album.id,
                    label,
                    tags,
                    enrichment: Box::new(enrichment),
                }
            }
        }
        Ok(None) => RetagEvent::Missing {
            artist: album.albumartist.clone(),
            album: album.album.clone(),
        },
        Err(error) => RetagEvent::Failed { label, error },
    }
}

/// Re-run the engine over albums already in the library.
///
/// Albums whose stored tags already equal the projected tags are skipped
/// unless `force` is set.
pub fn retag(engine: &Engine, library: &mut Library, filter: &AlbumFilter, force: bool) -> Result<RunStats> {
    let start = Instant::now();
    let config = engine.config();

    let index = with_spinner("Loading RYM dataset", || engine.dataset())?;
    info!("RYM dataset {} ready ({} releases)", index.snapshot_id(), index.len());

    let albums = library.albums(filter)?;
    let total = albums.len() as u64;
    info!("Re-tagging {} albums{}", total, if force { " (force)" } else { "" });

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| Error::Config(format!("cannot build worker pool: {}", e)))?;

    let mut progress = RetagProgress::new(total);
    let mut stats = RunStats::default();
    let mut missing: Vec<(String, String)> = Vec::new();
    let mut pending: Vec<(i64, TagStrings)> = Vec::with_capacity(WRITE_BATCH_SIZE);

    let (tx, rx) = bounded::<RetagEvent>(WRITE_BATCH_SIZE * 2);
    let write_result: Result<()> = std::thread::scope(|s| {
        // Owned here so an early return disconnects the workers.
        let rx = rx;
        let albums = &albums;
        s.spawn(move || {
            pool.install(|| {
                albums.par_iter().for_each_with(tx, |tx, album| {
                    // Receiver gone means the writer failed; stop quietly.
                    let _ = tx.send(retag_one(engine, album, force));
                });
            });
        });

        for event in rx.iter() {
            stats.processed += 1;
            let outcome = match event {
                RetagEvent::Updated { id, label, tags, enrichment } => {
                    stats.updated += 1;
                    stats.record_match(&enrichment.result);
                    debug!("Updated RYM tags: {} [{}]", label, tags.genre);
                    pending.push((id, tags));
                    if pending.len() >= WRITE_BATCH_SIZE {
                        library.store_batch(&pending)?;
                        pending.clear();
                    }
                    AlbumOutcome::Updated
                }
                RetagEvent::UpToDate { label } => {
                    stats.skipped_up_to_date += 1;
                    debug!("Skipping (already up-to-date): {}", label);
                    AlbumOutcome::UpToDate
                }
                RetagEvent::Missing { artist, album } => {
                    stats.missing += 1;
                    debug!("No RYM match found: {} - {}", artist, album);
                    missing.push((artist, album));
                    AlbumOutcome::Missing
                }
                RetagEvent::Failed { label, error } => {
                    stats.missing += 1;
                    warn!("Could not match {}: {}", label, error);
                    AlbumOutcome::Missing
                }
            };
            progress.record(outcome);
        }
        if !pending.is_empty() {
            library.store_batch(&pending)?;
        }
        Ok(())
    });
    write_result?;
    progress.finish();

    if config.log_missing_matches && !missing.is_empty() {
        let log = MissingMatchLog::new(config.missing_matches_logfile.clone());
        let mut written = 0;
        for (artist, album) in &missing {
            match log.record(artist, album) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not write to {}: {}", log.path().display(), e);
                    break;
                }
            }
        }
        info!("Logged {} missing matches to {}", written, log.path().display());
    }

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    info!(
        "Summary: updated {}/{} albums, skipped {}, missing {} in {}",
        stats.updated,
        stats.processed,
        stats.skipped_up_to_date,
        stats.missing,
        format_duration(start.elapsed())
    );
    Ok(stats)
}
