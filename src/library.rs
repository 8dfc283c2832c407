//! Host library: album records in a SQLite database.
//!
//! Only the columns the engine reads or writes are modelled: album artist,
//! album title, and the four tag fields.

use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::errors::Result;
use crate::projector::TagStrings;

const LIBRARY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS albums (
        id INTEGER PRIMARY KEY,
        albumartist TEXT NOT NULL,
        album TEXT NOT NULL,
        genre TEXT NOT NULL DEFAULT '',
        style TEXT NOT NULL DEFAULT '',
        mood TEXT NOT NULL DEFAULT '',
        grouping TEXT NOT NULL DEFAULT ''
    );
";

#[derive(Clone, Debug, PartialEq)]
pub struct AlbumRecord {
    pub id: i64,
    pub albumartist: String,
    pub album: String,
    pub tags: TagStrings,
}

// ============================================================================
// Filter expressions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterField {
    Artist,
    Album,
    Any,
}

/// Album filter: `artist:NAME`, `album:TITLE`, or bare terms matching either.
/// All terms must match (case-insensitive substring).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlbumFilter {
    terms: Vec<(FilterField, String)>,
}

impl AlbumFilter {
    pub fn parse(args: &[String]) -> Self {
        let mut terms = Vec::new();
        for arg in args {
            let (field, value) = if let Some(rest) = arg.strip_prefix("artist:") {
                (FilterField::Artist, rest)
            } else if let Some(rest) = arg.strip_prefix("album:") {
                (FilterField::Album, rest)
            } else {
                (FilterField::Any, arg.as_str())
            };
            let value = value.trim();
            if !value.is_empty() {
                terms.push((field, value.to_lowercase()));
            }
        }
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// WHERE clause (with leading keyword) and its LIKE patterns.
    fn to_sql(&self) -> (String, Vec<String>) {
        if self.terms.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut clauses = Vec::with_capacity(self.terms.len());
        let mut patterns = Vec::new();
        for (field, value) in &self.terms {
            let pattern = format!("%{}%", value);
            match field {
                FilterField::Artist => clauses.push("LOWER(albumartist) LIKE ?".to_string()),
                FilterField::Album => clauses.push("LOWER(album) LIKE ?".to_string()),
                FilterField::Any => {
                    clauses.push("(LOWER(albumartist) LIKE ? OR LOWER(album) LIKE ?)".to_string());
                    patterns.push(pattern.clone());
                }
            }
            patterns.push(pattern);
        }
        (format!("WHERE {}", clauses.join(" AND ")), patterns)
    }
}

// ============================================================================
// Library
// ============================================================================

pub struct Library {
    conn: Connection,
}

impl Library {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA busy_timeout = 15000;")?;
        conn.execute_batch(LIBRARY_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LIBRARY_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert an album with empty tags, returning its id.
    pub fn add_album(&self, albumartist: &str, album: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO albums (albumartist, album) VALUES (?1, ?2)",
            params![albumartist, album],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count(&self, filter: &AlbumFilter) -> Result<usize> {
        let (where_clause, patterns) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) FROM albums {}", where_clause);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(patterns.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn albums(&self, filter: &AlbumFilter) -> Result<Vec<AlbumRecord>> {
        let (where_clause, patterns) = filter.to_sql();
        let sql = format!(
            "SELECT id, albumartist, album, genre, style, mood, grouping FROM albums {} ORDER BY id",
            where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(patterns.iter()), row_to_album)?;
        let mut albums = Vec::new();
        for album in rows {
            albums.push(album?);
        }
        Ok(albums)
    }

    pub fn get(&self, id: i64) -> Result<Option<AlbumRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, albumartist, album, genre, style, mood, grouping FROM albums WHERE id = ?1",
                [id],
                row_to_album,
            )
            .optional()?)
    }

    pub fn store_tags(&mut self, id: i64, tags: &TagStrings) -> Result<()> {
        self.store_batch(&[(id, tags.clone())])
    }

    /// Write tag updates in one transaction.
    pub fn store_batch(&mut self, updates: &[(i64, TagStrings)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE albums SET genre = ?1, style = ?2, mood = ?3, grouping = ?4 WHERE id = ?5",
            )?;
            for (id, tags) in updates {
                stmt.execute(params![tags.genre, tags.style, tags.mood, tags.grouping, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn row_to_album(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlbumRecord> {
    Ok(AlbumRecord {
        id: row.get(0)?,
        albumartist: row.get(1)?,
        album: row.get(2)?,
        tags: TagStrings {
            genre: row.get(3)?,
            style: row.get(4)?,
            mood: row.get(5)?,
            grouping: row.get(6)?,
        },
    })
}
