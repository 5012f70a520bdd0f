use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod config_file;
pub mod engine;
pub mod provider;
pub mod query;
pub mod rank;
pub mod rate_limit;
pub mod store;

// Re-export for convenience
pub use engine::{RefreshOutcome, SearchEngine};
pub use provider::SearchProvider;
pub use provider::deezer::DeezerProvider;
pub use query::{MAX_QUERY_LEN, MIN_QUERY_LEN, build_query_key, is_valid_term, normalize_key};
pub use rank::{JaroWinkler, Similarity};
pub use rate_limit::{AdaptiveRateLimiter, ProviderError};
pub use store::{
    CacheEntry, CacheEntryStore, DEFAULT_TTL, MemoryCatalog, SongStore, SqliteCatalog, StoreError,
};

/// A song as known to the catalog.
///
/// `external_id` is the provider's track id and the identity key for
/// reconciliation: two records with the same id are the same song, whatever
/// their other fields say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub external_id: u64,
    pub title: String,
    pub duration_secs: u32,
    pub artist: String,
    pub artist_id: u64,
    pub album: String,
    pub album_id: u64,
    pub artwork_url: Option<String>,
    /// Provider preview links expire after about a day; treat as a hint and
    /// re-fetch through [`SearchEngine::preview`] when it matters.
    pub preview_url: Option<String>,
}

/// Build the store pair backing a [`SearchEngine`].
///
/// If `path` is set, opens a persistent SQLite catalog (creating parent
/// directories first). Otherwise, or when opening fails, falls back to a
/// process-local in-memory catalog.
pub fn build_catalog(path: Option<&Path>) -> (Arc<dyn SongStore>, Arc<dyn CacheEntryStore>) {
    if let Some(path) = path {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match SqliteCatalog::open(path) {
            Ok(catalog) => {
                tracing::info!(path = %path.display(), "opened persistent catalog");
                let catalog = Arc::new(catalog);
                return (catalog.clone(), catalog);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open catalog, falling back to in-memory");
            }
        }
    }
    let catalog = Arc::new(MemoryCatalog::new());
    (catalog.clone(), catalog)
}

#[cfg(test)]
mod build_catalog_tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!(
                "tunedex_build_catalog_test_{}_{}",
                std::process::id(),
                id,
            ))
            .join("catalog.db")
    }

    fn sample_song() -> Song {
        Song {
            external_id: 1,
            title: "Revival".to_string(),
            duration_secs: 200,
            artist: "Zach Bryan".to_string(),
            artist_id: 70,
            album: "American Heartbreak".to_string(),
            album_id: 900,
            artwork_url: None,
            preview_url: None,
        }
    }

    #[test]
    fn none_path_builds_a_working_memory_catalog() {
        let (songs, entries) = build_catalog(None);
        songs.save_all(&[sample_song()]).unwrap();
        assert_eq!(songs.song_count().unwrap(), 1);
        assert_eq!(entries.entry_count().unwrap(), 0);
    }

    #[test]
    fn valid_path_creates_parent_and_persists() {
        let path = temp_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        {
            let (songs, _) = build_catalog(Some(&path));
            songs.save_all(&[sample_song()]).unwrap();
        }
        assert!(path.exists());

        let (songs, _) = build_catalog(Some(&path));
        assert_eq!(songs.song_count().unwrap(), 1);

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn unopenable_path_falls_back_to_memory() {
        // A path nested under a regular file cannot be created.
        let blocker = std::env::temp_dir().join(format!(
            "tunedex_blocker_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst),
        ));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("sub").join("catalog.db");

        let (songs, _) = build_catalog(Some(&path));
        songs.save_all(&[sample_song()]).unwrap();
        assert_eq!(songs.song_count().unwrap(), 1);
        assert!(!path.exists());

        let _ = std::fs::remove_file(&blocker);
    }
}
