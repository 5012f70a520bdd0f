//! Persistence seams for the search engine.
//!
//! Two stores back the engine: a song catalog keyed by provider id and a
//! query cache keyed by canonical query string. Both come in an in-memory
//! flavor ([`MemoryCatalog`]) and a SQLite flavor ([`SqliteCatalog`]); the
//! engine only sees the [`SongStore`] and [`CacheEntryStore`] traits.
//!
//! Cache entries are never deleted when they go stale. Staleness is decided
//! at read time against the TTL, and a later refresh overwrites the entry in
//! place, so the stores only ever grow or get explicitly cleared.

mod memory;
mod sqlite;

pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Song;

/// Default time-to-live for cache entries: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A cached query with the songs it resolved to.
///
/// `results` is the materialized view of the entry's membership; the stores
/// persist song ids and resolve them back through the song catalog on read.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// Normalized (trimmed, lower-cased) query key.
    pub canonical_query: String,
    /// Unix timestamp (seconds) of the last refresh.
    pub last_updated: u64,
    pub results: Vec<Song>,
}

impl CacheEntry {
    /// New entry stamped with the current time.
    pub fn new(canonical_query: String, results: Vec<Song>) -> Self {
        Self {
            canonical_query,
            last_updated: now_epoch(),
            results,
        }
    }

    /// Whether the entry has outlived `ttl`.
    ///
    /// The comparison is strict: an entry exactly `ttl` old is still fresh,
    /// one second past it is stale. Precision is whole seconds.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        now_epoch().saturating_sub(self.last_updated) > ttl.as_secs()
    }
}

pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Failure in a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Catalog of songs keyed by the provider's id.
pub trait SongStore: Send + Sync {
    fn find_by_external_id(&self, external_id: u64) -> Result<Option<Song>, StoreError>;

    /// Insert or update songs by external id. Existing rows are overwritten.
    fn save_all(&self, songs: &[Song]) -> Result<(), StoreError>;

    fn song_count(&self) -> Result<u64, StoreError>;

    /// Remove every song and every cache membership row that points at one.
    /// Cache entries themselves survive and re-populate on their next miss.
    fn clear_songs(&self) -> Result<(), StoreError>;
}

/// Query cache keyed by canonical query string.
///
/// Lookup is case-insensitive; callers normalize keys with
/// [`normalize_key`](crate::query::normalize_key) before both reads and
/// writes, and the SQLite flavor additionally collates the column nocase.
pub trait CacheEntryStore: Send + Sync {
    fn find_by_query(&self, canonical_query: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert the entry, or overwrite timestamp and membership if the key
    /// already exists. Concurrent refreshes of one key resolve to whichever
    /// writer lands last.
    fn save(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    fn entry_count(&self) -> Result<u64, StoreError>;
}
