//! SQLite-backed catalog (persists across process restarts).
//!
//! Writes go through a single connection behind a [`Mutex`]; reads use a
//! pool of read-only connections (WAL mode allows concurrent readers while
//! a write is in flight). Songs and cache entries live in separate tables
//! with a membership table joining them, so a song shared by several cached
//! queries is stored once.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{CacheEntry, CacheEntryStore, SongStore, StoreError};
use crate::Song;

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// Pool of read-only connections for concurrent lookups.
///
/// Connections are returned to the pool after a successful read. If the pool
/// is empty, a new connection is opened. A connection that produced an error
/// is dropped rather than pooled.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.acquire()?;
        let result = f(&conn);
        if result.is_ok() {
            self.release(conn);
        }
        result
    }

    fn acquire(&self) -> Result<Connection, StoreError> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Ok(conn);
        }
        Ok(open_sqlite(&self.path, true)?)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }
}

/// Persistent song catalog and query cache in a single SQLite file.
pub struct SqliteCatalog {
    writer: Mutex<Connection>,
    readers: ReadPool,
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                 external_id   INTEGER PRIMARY KEY,
                 title         TEXT NOT NULL,
                 duration_secs INTEGER NOT NULL,
                 artist        TEXT NOT NULL,
                 artist_id     INTEGER NOT NULL,
                 album         TEXT NOT NULL,
                 album_id      INTEGER NOT NULL,
                 artwork_url   TEXT,
                 preview_url   TEXT
             );
             CREATE TABLE IF NOT EXISTS query_cache (
                 canonical_query TEXT NOT NULL COLLATE NOCASE PRIMARY KEY,
                 last_updated    INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS cache_results (
                 canonical_query TEXT NOT NULL COLLATE NOCASE,
                 song_id         INTEGER NOT NULL,
                 PRIMARY KEY (canonical_query, song_id)
             );",
        )?;
        tracing::debug!(path = %path.display(), "opened sqlite catalog");
        Ok(Self {
            writer: Mutex::new(conn),
            readers: ReadPool::new(path),
        })
    }

    fn write(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn row_to_song(row: &rusqlite::Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        external_id: row.get(0)?,
        title: row.get(1)?,
        duration_secs: row.get(2)?,
        artist: row.get(3)?,
        artist_id: row.get(4)?,
        album: row.get(5)?,
        album_id: row.get(6)?,
        artwork_url: row.get(7)?,
        preview_url: row.get(8)?,
    })
}

const SONG_COLUMNS: &str =
    "external_id, title, duration_secs, artist, artist_id, album, album_id, artwork_url, preview_url";

impl SongStore for SqliteCatalog {
    fn find_by_external_id(&self, external_id: u64) -> Result<Option<Song>, StoreError> {
        self.readers.with(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SONG_COLUMNS} FROM songs WHERE external_id = ?1"
            ))?;
            Ok(stmt
                .query_row(params![external_id], row_to_song)
                .optional()?)
        })
    }

    fn save_all(&self, songs: &[Song]) -> Result<(), StoreError> {
        if songs.is_empty() {
            return Ok(());
        }
        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO songs ({SONG_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(external_id) DO UPDATE SET
                     title = excluded.title,
                     duration_secs = excluded.duration_secs,
                     artist = excluded.artist,
                     artist_id = excluded.artist_id,
                     album = excluded.album,
                     album_id = excluded.album_id,
                     artwork_url = excluded.artwork_url,
                     preview_url = excluded.preview_url"
            ))?;
            for song in songs {
                stmt.execute(params![
                    song.external_id,
                    song.title,
                    song.duration_secs,
                    song.artist,
                    song.artist_id,
                    song.album,
                    song.album_id,
                    song.artwork_url,
                    song.preview_url,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn song_count(&self) -> Result<u64, StoreError> {
        self.readers.with(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?)
        })
    }

    fn clear_songs(&self) -> Result<(), StoreError> {
        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cache_results", [])?;
        tx.execute("DELETE FROM songs", [])?;
        tx.commit()?;
        // Reclaim disk space. Without VACUUM the deleted pages stay free.
        conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

impl CacheEntryStore for SqliteCatalog {
    fn find_by_query(&self, canonical_query: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.readers.with(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT canonical_query, last_updated FROM query_cache WHERE canonical_query = ?1",
            )?;
            let header = stmt
                .query_row(params![canonical_query], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
                })
                .optional()?;
            let Some((stored_query, last_updated)) = header else {
                return Ok(None);
            };

            let mut stmt = conn.prepare_cached(
                "SELECT s.external_id, s.title, s.duration_secs, s.artist, s.artist_id,
                        s.album, s.album_id, s.artwork_url, s.preview_url
                 FROM cache_results cr
                 JOIN songs s ON s.external_id = cr.song_id
                 WHERE cr.canonical_query = ?1
                 ORDER BY cr.song_id",
            )?;
            let results = stmt
                .query_map(params![canonical_query], row_to_song)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(CacheEntry {
                canonical_query: stored_query,
                last_updated,
                results,
            }))
        })
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO query_cache (canonical_query, last_updated) VALUES (?1, ?2)
             ON CONFLICT(canonical_query) DO UPDATE SET last_updated = excluded.last_updated",
            params![entry.canonical_query, entry.last_updated],
        )?;
        tx.execute(
            "DELETE FROM cache_results WHERE canonical_query = ?1",
            params![entry.canonical_query],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO cache_results (canonical_query, song_id) VALUES (?1, ?2)",
            )?;
            for song in &entry.results {
                stmt.execute(params![entry.canonical_query, song.external_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn entry_count(&self) -> Result<u64, StoreError> {
        self.readers.with(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))?)
        })
    }
}
