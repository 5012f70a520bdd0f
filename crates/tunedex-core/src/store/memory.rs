//! In-memory catalog used for tests and cache-less runs.
//!
//! Mirrors the SQLite layout: entries keep song ids, not song copies, and
//! resolve them through the song map on read. Ids with no matching song are
//! dropped from the materialized results the same way a join would drop them.

use dashmap::DashMap;

use super::{CacheEntry, CacheEntryStore, SongStore, StoreError};
use crate::Song;

#[derive(Default)]
pub struct MemoryCatalog {
    songs: DashMap<u64, Song>,
    entries: DashMap<String, StoredEntry>,
}

struct StoredEntry {
    canonical_query: String,
    last_updated: u64,
    members: Vec<u64>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SongStore for MemoryCatalog {
    fn find_by_external_id(&self, external_id: u64) -> Result<Option<Song>, StoreError> {
        Ok(self.songs.get(&external_id).map(|s| s.clone()))
    }

    fn save_all(&self, songs: &[Song]) -> Result<(), StoreError> {
        for song in songs {
            self.songs.insert(song.external_id, song.clone());
        }
        Ok(())
    }

    fn song_count(&self) -> Result<u64, StoreError> {
        Ok(self.songs.len() as u64)
    }

    fn clear_songs(&self) -> Result<(), StoreError> {
        self.songs.clear();
        for mut stored in self.entries.iter_mut() {
            stored.members.clear();
        }
        Ok(())
    }
}

impl CacheEntryStore for MemoryCatalog {
    fn find_by_query(&self, canonical_query: &str) -> Result<Option<CacheEntry>, StoreError> {
        let Some(stored) = self.entries.get(&canonical_query.to_lowercase()) else {
            return Ok(None);
        };
        let results = stored
            .members
            .iter()
            .filter_map(|id| self.songs.get(id).map(|s| s.clone()))
            .collect();
        Ok(Some(CacheEntry {
            canonical_query: stored.canonical_query.clone(),
            last_updated: stored.last_updated,
            results,
        }))
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(
            entry.canonical_query.to_lowercase(),
            StoredEntry {
                canonical_query: entry.canonical_query.clone(),
                last_updated: entry.last_updated,
                members: entry.results.iter().map(|s| s.external_id).collect(),
            },
        );
        Ok(())
    }

    fn entry_count(&self) -> Result<u64, StoreError> {
        Ok(self.entries.len() as u64)
    }
}
