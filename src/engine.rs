//! The matching engine instance.
//!
//! An `Engine` owns everything a lookup needs: config, genre hierarchy,
//! durable cache, dataset source, and the in-memory dataset index. It is
//! `Sync`; the re-tag pipeline shares one engine across its worker pool.
//!
//! Dataset resolution, in order:
//! 1. in-memory index, while younger than `cache_duration`
//! 2. cached snapshot in the dataset namespace, while fresh
//! 3. fetch + parse + normalize, stored back to the cache
//! 4. on fetch/parse failure: the last good snapshot (memory or stale cache
//!    entry), retried again after `dataset_retry_interval`
//!
//! Concurrent misses for the dataset, or for the same match key, coalesce
//! into one computation.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::cache::{CacheStore, Clock, Lookup, Namespace, SystemClock};
use crate::config::Config;
use crate::dataset::{DatasetIndex, DatasetSnapshot};
use crate::errors::Result;
use crate::fetch::{AutoDatasetSource, DatasetSource};
use crate::hierarchy::GenreHierarchy;
use crate::matcher::{self, QueryKeys};
use crate::models::{DatasetRecord, MatchQuery, MatchResult};
use crate::single_flight::SingleFlight;

/// A match plus the groupings derived from its genres.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
    pub result: MatchResult,
    pub groupings: Vec<String>,
}

struct LoadedDataset {
    index: Arc<DatasetIndex>,
    /// Unix seconds after which the dataset is resolved again
    refresh_after: i64,
}

pub struct Engine {
    config: Config,
    hierarchy: Option<GenreHierarchy>,
    cache: CacheStore,
    source: Box<dyn DatasetSource>,
    dataset: RwLock<Option<LoadedDataset>>,
    dataset_flight: SingleFlight<Result<Arc<DatasetIndex>>>,
    match_flight: SingleFlight<Option<MatchResult>>,
    match_fingerprint: String,
}

/// Match cache key: every artist key variation, every title key variation,
/// the dataset snapshot, and the matching-config fingerprint. Two queries
/// share a key only if the matcher sees identical inputs. Normalized keys are
/// `[a-z0-9 ]`, so ',' and '|' cannot collide.
pub fn match_cache_key(query: &MatchQuery, snapshot_id: &str, fingerprint: &str) -> String {
    let keys = QueryKeys::new(query);
    format!(
        "{}|{}|{}|{}",
        keys.artist.join(","),
        keys.title.join(","),
        snapshot_id,
        fingerprint
    )
}

impl Engine {
    /// Production wiring: SQLite cache at `cache_file`, HTTP/file dataset
    /// source, system clock.
    pub fn open(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = CacheStore::open(&config.cache_file, &[config.library_file.as_path()], clock)?;
        let source = AutoDatasetSource::new(Duration::from_secs(config.fetch_timeout_secs), config.fetch_retries);
        Self::new(config, Box::new(source), cache)
    }

    /// Loads the genre hierarchy when `use_hierarchy` is set (failure is fatal)
    /// and sweeps expired cache entries.
    pub fn new(config: Config, source: Box<dyn DatasetSource>, cache: CacheStore) -> Result<Self> {
        let hierarchy = if config.use_hierarchy {
            match GenreHierarchy::load(&config.genre_tree_file, &config.excluded_genres_file) {
                Ok(hierarchy) => Some(hierarchy),
                Err(e) => {
                    error!("Cannot start with use_hierarchy enabled: {}", e);
                    return Err(e);
                }
            }
        } else {
            None
        };
        Ok(Self::with_hierarchy(config, hierarchy, source, cache))
    }

    pub fn with_hierarchy(
        config: Config,
        hierarchy: Option<GenreHierarchy>,
        source: Box<dyn DatasetSource>,
        cache: CacheStore,
    ) -> Self {
        let match_fingerprint = config.match_fingerprint();
        let engine = Self {
            config,
            hierarchy,
            cache,
            source,
            dataset: RwLock::new(None),
            dataset_flight: SingleFlight::new(),
            match_flight: SingleFlight::new(),
            match_fingerprint,
        };
        if let Err(e) = engine.sweep_cache() {
            warn!("Cache sweep failed: {}", e);
        }
        engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hierarchy(&self) -> Option<&GenreHierarchy> {
        self.hierarchy.as_ref()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Evict expired cache entries. Returns how many were removed.
    pub fn sweep_cache(&self) -> Result<usize> {
        self.cache.invalidate_expired()
    }

    // ========================================================================
    // Dataset
    // ========================================================================

    fn current_dataset(&self, now: i64) -> Option<Arc<DatasetIndex>> {
        let guard = self.dataset.read().ok()?;
        let loaded = guard.as_ref()?;
        (now < loaded.refresh_after).then(|| Arc::clone(&loaded.index))
    }

    fn previous_dataset(&self) -> Option<Arc<DatasetIndex>> {
        let guard = self.dataset.read().ok()?;
        guard.as_ref().map(|loaded| Arc::clone(&loaded.index))
    }

    fn install_dataset(&self, index: Arc<DatasetIndex>, refresh_after: i64) {
        match self.dataset.write() {
            Ok(mut guard) => *guard = Some(LoadedDataset { index, refresh_after }),
            Err(_) => warn!("Dataset lock poisoned; not keeping the loaded snapshot"),
        }
    }

    /// The current dataset index, loading or refreshing it if needed.
    pub fn dataset(&self) -> Result<Arc<DatasetIndex>> {
        if let Some(index) = self.current_dataset(self.cache.now()) {
            return Ok(index);
        }
        let source = self.config.dataset_url.clone();
        self.dataset_flight.work(&source, || self.load_dataset(&source))
    }

    fn load_dataset(&self, source: &str) -> Result<Arc<DatasetIndex>> {
        let now = self.cache.now();
        // Another caller may have finished a load just before this flight began.
        if let Some(index) = self.current_dataset(now) {
            return Ok(index);
        }
        let ttl = self.config.cache_duration as i64;

        let mut fallback = self.previous_dataset();
        match self.cache.lookup::<DatasetSnapshot>(Namespace::Dataset, source) {
            Ok(Lookup::Fresh(snapshot)) => {
                let refresh_after = snapshot.fetched_at.saturating_add(ttl);
                let index = Arc::new(DatasetIndex::new(snapshot));
                info!(
                    "Using cached RYM dataset {} ({} releases)",
                    index.snapshot_id(),
                    index.len()
                );
                self.install_dataset(Arc::clone(&index), refresh_after);
                return Ok(index);
            }
            Ok(Lookup::Stale { value, .. }) => {
                if fallback.is_none() {
                    fallback = Some(Arc::new(DatasetIndex::new(value)));
                }
            }
            Ok(Lookup::Miss) => {}
            Err(e) => warn!("Dataset cache read failed: {}", e),
        }

        match self.fetch_dataset(source, now) {
            Ok(index) => {
                self.install_dataset(Arc::clone(&index), now.saturating_add(ttl));
                Ok(index)
            }
            Err(e) if e.is_dataset_failure() => match fallback {
                Some(stale) => {
                    warn!(
                        "No usable dataset this cycle ({}); using snapshot {} fetched at {}",
                        e,
                        stale.snapshot_id(),
                        stale.fetched_at()
                    );
                    let retry_after = now.saturating_add(self.config.dataset_retry_interval as i64);
                    self.install_dataset(Arc::clone(&stale), retry_after);
                    Ok(stale)
                }
                None => {
                    error!("No usable dataset this cycle: {}", e);
                    Err(e)
                }
            },
            Err(e) => Err(e),
        }
    }

    fn fetch_dataset(&self, source: &str, now: i64) -> Result<Arc<DatasetIndex>> {
        let body = self.source.fetch(source)?;
        let snapshot = DatasetSnapshot::from_body(source, &body, self.config.parse_mode, now)?;
        if let Err(e) = self
            .cache
            .put(Namespace::Dataset, source, &snapshot, self.config.cache_duration)
        {
            warn!("Could not cache dataset snapshot: {}", e);
        }
        let index = DatasetIndex::new(snapshot);
        info!(
            "Loaded RYM dataset {}: {} releases under {} artist keys",
            index.snapshot_id(),
            index.len(),
            index.artist_count()
        );
        Ok(Arc::new(index))
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Resolve a query, consulting the match cache first. `Ok(None)` is a
    /// definite no-match for the current snapshot (also cached).
    pub fn find_match(&self, query: &MatchQuery) -> Result<Option<MatchResult>> {
        let index = self.dataset()?;
        let key = match_cache_key(query, index.snapshot_id(), &self.match_fingerprint);

        match self.cache.get::<Option<MatchResult>>(Namespace::Match, &key) {
            Ok(Some(cached)) => {
                debug!("Match cache hit for {}", key);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!("Match cache read failed: {}", e),
        }

        Ok(self.match_flight.work(&key, || {
            let result = matcher::find_match(&index, query, &self.config);
            if let Err(e) = self
                .cache
                .put(Namespace::Match, &key, &result, self.config.cache_duration)
            {
                warn!("Could not cache match for {}: {}", key, e);
            }
            result
        }))
    }

    /// Ancestor groupings for a matched record; empty when the hierarchy is off.
    pub fn groupings(&self, record: &DatasetRecord) -> Vec<String> {
        match (&self.hierarchy, self.config.use_hierarchy) {
            (Some(hierarchy), true) => hierarchy.groupings(
                &record.genres,
                &record.secondary_genres,
                self.config.max_hierarchy_depth,
                self.config.max_groupings,
            ),
            _ => Vec::new(),
        }
    }

    /// Match and expand in one step.
    pub fn enrich(&self, query: &MatchQuery) -> Result<Option<Enrichment>> {
        Ok(self.find_match(query)?.map(|result| {
            let groupings = self.groupings(&result.record);
            Enrichment { result, groupings }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::errors::Error;
    use crate::hierarchy::{ExclusionSet, GenreTree};
    use crate::models::MatchedBy;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const BODY: &str = r#"{
        "beatles": {
            "abbey-road": {
                "artistName": "Beatles",
                "releaseTitle": "Abbey Road",
                "genres": ["Pop Rock"],
                "secondaryGenres": ["Psychedelic Pop"],
                "descriptors": ["melodic", "warm", "male vocals"]
            }
        }
    }"#;

    const T0: i64 = 1_700_000_000;

    /// In-memory source counting fetches; can be switched to fail.
    struct CountingSource {
        body: Mutex<String>,
        fetches: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl DatasetSource for CountingSource {
        fn fetch(&self, _source: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::DatasetUnavailable("connection refused".to_string()));
            }
            Ok(self.body.lock().unwrap().clone())
        }
    }

    struct Harness {
        engine: Engine,
        clock: Arc<ManualClock>,
        fetches: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    fn hierarchy() -> GenreHierarchy {
        GenreHierarchy {
            tree: GenreTree::from_edges(vec![
                ("Rock", vec![]),
                ("Pop", vec![]),
                ("Regional Music", vec![]),
                ("Pop Rock", vec!["Pop", "Rock"]),
                ("Psychedelic Pop", vec!["Pop"]),
            ]),
            exclusions: ExclusionSet::new(["Regional Music"]),
        }
    }

    fn config() -> Config {
        Config {
            dataset_url: "https://example.invalid/rym.json".to_string(),
            ..Config::default()
        }
    }

    fn harness_with(cache_path: Option<&Path>, clock: Arc<ManualClock>) -> Harness {
        harness_configured(config(), cache_path, clock)
    }

    fn harness_configured(config: Config, cache_path: Option<&Path>, clock: Arc<ManualClock>) -> Harness {
        let fetches = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            body: Mutex::new(BODY.to_string()),
            fetches: Arc::clone(&fetches),
            failing: Arc::clone(&failing),
        };
        let cache = match cache_path {
            Some(path) => CacheStore::open(path, &[], clock.clone()).unwrap(),
            None => CacheStore::open_in_memory(clock.clone()).unwrap(),
        };
        let engine = Engine::with_hierarchy(config, Some(hierarchy()), Box::new(source), cache);
        Harness {
            engine,
            clock,
            fetches,
            failing,
        }
    }

    fn harness() -> Harness {
        harness_with(None, Arc::new(ManualClock::new(T0)))
    }

    #[test]
    fn test_end_to_end_beatles() {
        let h = harness();
        let enrichment = h
            .engine
            .enrich(&MatchQuery::new("The Beatles", "Abbey Road"))
            .unwrap()
            .unwrap();
        assert_eq!(enrichment.result.matched_by, MatchedBy::Exact);
        assert_eq!(enrichment.result.score, 1.0);
        assert_eq!(enrichment.result.record.genres, vec!["Pop Rock"]);
        assert_eq!(enrichment.result.record.secondary_genres, vec!["Psychedelic Pop"]);
        assert_eq!(enrichment.result.record.descriptors, vec!["melodic", "warm", "male vocals"]);
        assert_eq!(enrichment.groupings, vec!["Pop", "Rock"]);
    }

    #[test]
    fn test_dataset_fetched_once_within_ttl() {
        let h = harness();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| h.engine.find_match(&MatchQuery::new("Beatles", "Abbey Road")).unwrap());
            }
        });
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);

        h.clock.advance(3599);
        h.engine.dataset().unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);

        h.clock.advance(2);
        h.engine.dataset().unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_fallback_and_retry_interval() {
        let h = harness();
        let first = h.engine.dataset().unwrap();

        h.failing.store(true, Ordering::SeqCst);
        h.clock.advance(3601);
        let stale = h.engine.dataset().unwrap();
        assert_eq!(stale.snapshot_id(), first.snapshot_id());
        assert_eq!(h.fetches.load(Ordering::SeqCst), 2);

        // Not retried before the retry interval
        h.clock.advance(100);
        h.engine.dataset().unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 2);

        h.clock.advance(201);
        h.engine.dataset().unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_dataset_is_an_error() {
        let h = harness();
        h.failing.store(true, Ordering::SeqCst);
        let err = h.engine.find_match(&MatchQuery::new("Beatles", "Abbey Road")).unwrap_err();
        assert!(matches!(err, Error::DatasetUnavailable(_)));
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rym_cache.sqlite3");
        let clock = Arc::new(ManualClock::new(T0));
        {
            let h = harness_with(Some(&path), clock.clone());
            h.engine.dataset().unwrap();
            assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
        }
        clock.advance(60);
        let h = harness_with(Some(&path), clock.clone());
        h.engine.find_match(&MatchQuery::new("Beatles", "Abbey Road")).unwrap().unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);

        // Expired on disk and the source is down: the stale snapshot still serves
        clock.advance(4000);
        let h = harness_with(Some(&path), clock);
        h.failing.store(true, Ordering::SeqCst);
        assert!(h.engine.dataset().is_ok());
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_match_results_are_cached_including_none() {
        let h = harness();
        let hit = MatchQuery::new("Beatles", "Abbey Road");
        let miss = MatchQuery::new("Metallica", "Master of Puppets");
        assert!(h.engine.find_match(&hit).unwrap().is_some());
        assert!(h.engine.find_match(&miss).unwrap().is_none());
        assert_eq!(h.engine.cache().len(Namespace::Match).unwrap(), 2);

        let index = h.engine.dataset().unwrap();
        let cached: Option<Option<MatchResult>> = h
            .engine
            .cache()
            .get(
                Namespace::Match,
                &match_cache_key(&miss, index.snapshot_id(), &config().match_fingerprint()),
            )
            .unwrap();
        assert_eq!(cached, Some(None));
    }

    #[test]
    fn test_hierarchy_load_failure_is_fatal() {
        let config = Config {
            use_hierarchy: true,
            genre_tree_file: "/nonexistent/tree.json".into(),
            ..config()
        };
        let cache = CacheStore::open_in_memory(Arc::new(ManualClock::new(T0))).unwrap();
        let source = CountingSource {
            body: Mutex::new(BODY.to_string()),
            fetches: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        };
        let result = Engine::new(config, Box::new(source), cache);
        assert!(matches!(result, Err(Error::HierarchyLoad(_))));
    }

    #[test]
    fn test_groupings_disabled() {
        let config = Config {
            use_hierarchy: false,
            ..config()
        };
        let cache = CacheStore::open_in_memory(Arc::new(ManualClock::new(T0))).unwrap();
        let source = CountingSource {
            body: Mutex::new(BODY.to_string()),
            fetches: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        };
        let engine = Engine::new(config, Box::new(source), cache).unwrap();
        let enrichment = engine.enrich(&MatchQuery::new("Beatles", "Abbey Road")).unwrap().unwrap();
        assert!(enrichment.groupings.is_empty());
    }

    #[test]
    fn test_match_cache_key_keeps_every_variation() {
        let fp = config().match_fingerprint();
        let a = match_cache_key(&MatchQuery::new("The Beatles", "Abbey Road"), "s1", &fp);
        let b = match_cache_key(&MatchQuery::new("beatles", "ABBEY ROAD"), "s1", &fp);
        assert_eq!(a, b);
        assert_ne!(a, match_cache_key(&MatchQuery::new("beatles", "abbey road"), "s2", &fp));
        assert_ne!(a, match_cache_key(&MatchQuery::new("beatles", "abbey road"), "s1", "other"));

        // Same normalized title, different variations once the parentheses go.
        let plain = MatchQuery::new("Beatles", "Abbey Road Remastered 2019 Super Deluxe Edition");
        let paren = MatchQuery::new("Beatles", "Abbey Road (Remastered 2019 Super Deluxe Edition)");
        assert_ne!(match_cache_key(&plain, "s1", &fp), match_cache_key(&paren, "s1", &fp));
    }

    #[test]
    fn test_result_independent_of_cache_order() {
        let plain = MatchQuery::new("Beatles", "Abbey Road Remastered 2019 Super Deluxe Edition");
        let paren = MatchQuery::new("Beatles", "Abbey Road (Remastered 2019 Super Deluxe Edition)");

        let cold = harness().engine.find_match(&paren).unwrap();
        assert_eq!(cold.as_ref().map(|r| r.matched_by), Some(MatchedBy::Exact));

        let warm = harness();
        let _ = warm.engine.find_match(&plain).unwrap();
        assert_eq!(warm.engine.find_match(&paren).unwrap(), cold);
    }

    #[test]
    fn test_cached_match_not_reused_under_stricter_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rym_cache.sqlite3");
        let clock = Arc::new(ManualClock::new(T0));
        let query = MatchQuery::new("Beatles", "Abbey Raod");

        let lenient = harness_configured(config(), Some(&path), clock.clone());
        let loose = lenient.engine.find_match(&query).unwrap().unwrap();
        assert_eq!(loose.matched_by, MatchedBy::ArtistAndAlbumSimilarity);
        assert!(loose.score < 0.99);
        drop(lenient);

        let strict_config = Config {
            similarity_threshold: 0.99,
            ..config()
        };
        let strict = harness_configured(strict_config, Some(&path), clock);
        assert_eq!(strict.engine.find_match(&query).unwrap(), None);
        // Dataset snapshot still came from the shared cache.
        assert_eq!(strict.fetches.load(Ordering::SeqCst), 0);
    }
}
