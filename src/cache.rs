//! Durable TTL cache over SQLite.
//!
//! One table holds every namespace. An entry is fresh while
//! `now < stored_at + ttl`; an expired entry is evicted the next time its key
//! is read, or by `invalidate_expired` at session start. The dataset namespace
//! keeps its last entry past expiry so a failed refresh can fall back to it.
//!
//! The database is only a cache: on a schema version mismatch it is deleted
//! and recreated.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{Error, Result};
use crate::safety::validate_reset_path;

/// Bump when the table layout or payload encoding changes.
const SCHEMA_VERSION: i64 = 1;

const CACHE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        stored_at INTEGER NOT NULL,
        ttl INTEGER NOT NULL,
        PRIMARY KEY (namespace, key)
    );
";

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Namespaces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Match results keyed by (artist key, album key, snapshot id)
    Match,
    /// Dataset snapshots keyed by source
    Dataset,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Match, Namespace::Dataset];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Match => "match",
            Namespace::Dataset => "dataset",
        }
    }

    /// Whether an expired entry is kept for stale fallback.
    pub fn retains_stale(self) -> bool {
        matches!(self, Namespace::Dataset)
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    /// Expired, kept only in namespaces that retain stale entries
    Stale { value: V, stored_at: i64 },
    Miss,
}

impl<V> Lookup<V> {
    pub fn fresh(self) -> Option<V> {
        match self {
            Lookup::Fresh(value) => Some(value),
            _ => None,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 15000;
        ",
    )?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CACHE_SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub struct CacheStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Open (or create) the cache file. On a schema mismatch the file is
    /// deleted and recreated, unless it is one of `protected_paths`.
    pub fn open(path: &Path, protected_paths: &[&Path], clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        let has_tables: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table')",
            [],
            |row| row.get(0),
        )?;

        let conn = if has_tables && version != SCHEMA_VERSION {
            validate_reset_path(path, "cache", protected_paths)?;
            info!(
                "Cache schema changed ({} -> {}); recreating {}",
                version,
                SCHEMA_VERSION,
                path.display()
            );
            drop(conn);
            for suffix in ["", "-wal", "-shm"] {
                let mut target = path.as_os_str().to_owned();
                target.push(suffix);
                let target = PathBuf::from(target);
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
            }
            Connection::open(path)?
        } else {
            conn
        };
        configure(&conn)?;
        create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("cache connection lock poisoned".to_string()))
    }

    fn delete(conn: &Connection, namespace: Namespace, key: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace.as_str(), key],
        )?;
        Ok(())
    }

    /// Read an entry, classifying it as fresh, stale, or missing.
    /// Expired entries in namespaces without stale retention are evicted here.
    pub fn lookup<V: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Result<Lookup<V>> {
        let now = self.clock.now();
        let conn = self.conn()?;
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT value, stored_at, ttl FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((text, stored_at, ttl)) = row else {
            return Ok(Lookup::Miss);
        };

        let fresh = now < stored_at.saturating_add(ttl);
        if !fresh && !namespace.retains_stale() {
            debug!("Evicting expired {} entry {}", namespace.as_str(), key);
            Self::delete(&conn, namespace, key)?;
            return Ok(Lookup::Miss);
        }

        let value: V = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping unreadable {} cache entry {}: {}", namespace.as_str(), key, e);
                Self::delete(&conn, namespace, key)?;
                return Ok(Lookup::Miss);
            }
        };
        Ok(if fresh {
            Lookup::Fresh(value)
        } else {
            Lookup::Stale { value, stored_at }
        })
    }

    /// Fresh value or `None`.
    pub fn get<V: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Result<Option<V>> {
        Ok(self.lookup(namespace, key)?.fresh())
    }

    /// Store a value with a TTL in seconds, replacing any previous entry.
    pub fn put<V: Serialize>(&self, namespace: Namespace, key: &str, value: &V, ttl: u64) -> Result<()> {
        let text = serde_json::to_string(value).map_err(|e| Error::Store(e.to_string()))?;
        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        let now = self.clock.now();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries (namespace, key, value, stored_at, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![namespace.as_str(), key, text, now, ttl],
        )?;
        Ok(())
    }

    /// Delete every expired entry in namespaces that do not retain stale
    /// entries. Returns the number of entries removed.
    pub fn invalidate_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let conn = self.conn()?;
        let mut removed = 0;
        for namespace in Namespace::ALL.into_iter().filter(|ns| !ns.retains_stale()) {
            removed += conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND stored_at + ttl <= ?2",
                params![namespace.as_str(), now],
            )?;
        }
        if removed > 0 {
            info!("Evicted {} expired cache entries", removed);
        }
        Ok(removed)
    }

    pub fn remove(&self, namespace: Namespace, key: &str) -> Result<()> {
        let conn = self.conn()?;
        Self::delete(&conn, namespace, key)
    }

    pub fn len(&self, namespace: Namespace) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?1",
            params![namespace.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
