//! The search engine: cache-first lookup with provider fallback.
//!
//! Every search resolves to a canonical query key. A fresh cache entry
//! under that key is served directly (ranked against the terms); anything
//! else goes to the provider, whose results are reconciled against the song
//! catalog and folded back into the cache for the next seven days.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::Song;
use crate::provider::SearchProvider;
use crate::query::{build_query_key, is_valid_term, normalize_key};
use crate::rank::{JaroWinkler, Similarity, rank};
use crate::store::{CacheEntry, CacheEntryStore, DEFAULT_TTL, SongStore, StoreError};

/// What a cache refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// First entry for this key.
    Created { new_songs: usize, total: usize },
    /// Existing entry re-stamped with fresh membership.
    Updated { new_songs: usize, total: usize },
    /// Nothing written (blank key).
    Skipped,
}

pub struct SearchEngine {
    songs: Arc<dyn SongStore>,
    entries: Arc<dyn CacheEntryStore>,
    provider: Arc<dyn SearchProvider>,
    similarity: Arc<dyn Similarity>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SearchEngine {
    pub fn new(
        songs: Arc<dyn SongStore>,
        entries: Arc<dyn CacheEntryStore>,
        provider: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            songs,
            entries,
            provider,
            similarity: Arc::new(JaroWinkler),
            ttl: DEFAULT_TTL,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Search for songs, serving from the cache when possible.
    ///
    /// At least one term must pass the length bounds or the search is
    /// rejected outright, with no store or provider access. A fresh cache
    /// entry with results is ranked against the terms and served; anything
    /// else (absent, stale, or empty entry) goes to the provider, whose
    /// results are returned in provider order after refreshing the cache.
    ///
    /// An empty entry falls through to the provider because it usually
    /// records an earlier provider failure rather than a true no-match.
    pub async fn search(
        &self,
        song_term: &str,
        artist_term: &str,
    ) -> Result<Vec<Song>, StoreError> {
        if !is_valid_term(song_term) && !is_valid_term(artist_term) {
            tracing::debug!(song_term, artist_term, "rejected search, no valid term");
            return Ok(Vec::new());
        }
        let Some(key) = build_query_key(song_term, artist_term) else {
            return Ok(Vec::new());
        };

        if let Some(results) = self.lookup(&key)? {
            if !results.is_empty() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, count = results.len(), "cache hit");
                return Ok(rank(
                    results,
                    song_term,
                    artist_term,
                    self.similarity.as_ref(),
                ));
            }
            tracing::debug!(key = %key, "cache hit with no results, re-querying provider");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let candidates = self.provider.search(song_term, artist_term).await;
        tracing::debug!(
            provider = self.provider.name(),
            count = candidates.len(),
            "provider search"
        );

        let outcome = self.refresh(&key, &candidates)?;
        tracing::debug!(key = %key, outcome = ?outcome, "cache refreshed");

        Ok(candidates)
    }

    /// Look up a key in the cache, honoring the TTL.
    ///
    /// The length bound applies to the whole built key, not just the terms,
    /// so a near-maximum term plus its tag can make a search uncacheable:
    /// the entry is written on refresh but a lookup never sees it.
    fn lookup(&self, key: &str) -> Result<Option<Vec<Song>>, StoreError> {
        if !is_valid_term(key) {
            return Ok(None);
        }
        let canonical = normalize_key(key);
        let Some(entry) = self.entries.find_by_query(&canonical)? else {
            return Ok(None);
        };
        if entry.is_expired(self.ttl) {
            tracing::debug!(key = %canonical, "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry.results))
    }

    /// Fold provider results into the cache under `key`.
    ///
    /// Candidates are matched to the song catalog by external id: a known
    /// id keeps its stored record, unknown ones are inserted. The entry's
    /// membership becomes the deduplicated candidate set and its timestamp
    /// resets to now. Songs are written before the entry so a crash in
    /// between leaves extra songs, never an entry pointing at nothing.
    pub fn refresh(&self, key: &str, candidates: &[Song]) -> Result<RefreshOutcome, StoreError> {
        let canonical = normalize_key(key);
        if canonical.is_empty() {
            return Ok(RefreshOutcome::Skipped);
        }

        let existed = self.entries.find_by_query(&canonical)?.is_some();

        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(candidates.len());
        let mut new_songs = Vec::new();
        for candidate in candidates {
            if !seen.insert(candidate.external_id) {
                continue;
            }
            match self.songs.find_by_external_id(candidate.external_id)? {
                Some(stored) => members.push(stored),
                None => {
                    new_songs.push(candidate.clone());
                    members.push(candidate.clone());
                }
            }
        }

        self.songs.save_all(&new_songs)?;

        let total = members.len();
        self.entries.save(&CacheEntry::new(canonical, members))?;

        Ok(if existed {
            RefreshOutcome::Updated {
                new_songs: new_songs.len(),
                total,
            }
        } else {
            RefreshOutcome::Created {
                new_songs: new_songs.len(),
                total,
            }
        })
    }

    /// Fetch a fresh preview clip URL for a song.
    ///
    /// Provider preview links expire, so the provider is always asked
    /// first; a fresh link also updates the stored song. When the provider
    /// comes back empty the last stored link is served instead.
    pub async fn preview(&self, external_id: u64) -> Result<Option<String>, StoreError> {
        let fresh = self.provider.preview(external_id).await;
        let stored = self.songs.find_by_external_id(external_id)?;
        match (fresh, stored) {
            (Some(url), Some(mut song)) => {
                if song.preview_url.as_deref() != Some(url.as_str()) {
                    song.preview_url = Some(url.clone());
                    self.songs.save_all(std::slice::from_ref(&song))?;
                    tracing::debug!(external_id, "updated stored preview link");
                }
                Ok(Some(url))
            }
            (Some(url), None) => Ok(Some(url)),
            (None, Some(song)) => Ok(song.preview_url),
            (None, None) => Ok(None),
        }
    }

    /// Searches served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Searches that went to the provider.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn song_count(&self) -> Result<u64, StoreError> {
        self.songs.song_count()
    }

    pub fn entry_count(&self) -> Result<u64, StoreError> {
        self.entries.entry_count()
    }

    pub fn clear_songs(&self) -> Result<(), StoreError> {
        self.songs.clear_songs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::store::{MemoryCatalog, now_epoch};

    fn song(id: u64, title: &str, artist: &str) -> Song {
        Song {
            external_id: id,
            title: title.to_string(),
            duration_secs: 200,
            artist: artist.to_string(),
            artist_id: 70,
            album: "American Heartbreak".to_string(),
            album_id: 900,
            artwork_url: None,
            preview_url: None,
        }
    }

    fn engine_with(provider: Arc<MockProvider>) -> (SearchEngine, Arc<MemoryCatalog>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = SearchEngine::new(catalog.clone(), catalog.clone(), provider);
        (engine, catalog)
    }

    /// Rewrite an entry's timestamp, simulating the passage of time.
    fn backdate(catalog: &MemoryCatalog, key: &str, age_secs: u64) {
        let mut entry = catalog.find_by_query(key).unwrap().unwrap();
        entry.last_updated = now_epoch() - age_secs;
        catalog.save(&entry).unwrap();
    }

    // ── cold miss and warm hit ─────────────────────────────────────────

    #[tokio::test]
    async fn cold_miss_queries_provider_and_caches() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, catalog) = engine_with(provider.clone());

        let results = engine.search("Revival", "Zach Bryan").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].external_id, 42);
        assert_eq!(provider.search_count(), 1);
        assert_eq!(catalog.song_count().unwrap(), 1);
        assert_eq!(catalog.entry_count().unwrap(), 1);
        assert_eq!(engine.misses(), 1);
        assert_eq!(engine.hits(), 0);
    }

    #[tokio::test]
    async fn warm_hit_serves_from_cache_without_provider() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, _) = engine_with(provider.clone());

        let cold = engine.search("Revival", "Zach Bryan").await.unwrap();
        let warm = engine.search("Revival", "Zach Bryan").await.unwrap();

        assert_eq!(cold, warm);
        assert_eq!(provider.search_count(), 1);
        assert_eq!(engine.hits(), 1);
        assert_eq!(engine.misses(), 1);
    }

    #[tokio::test]
    async fn hit_is_case_insensitive() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, _) = engine_with(provider.clone());

        engine.search("Revival", "Zach Bryan").await.unwrap();
        let warm = engine.search("rEvIvAl", "ZACH BRYAN").await.unwrap();

        assert_eq!(warm.len(), 1);
        assert_eq!(provider.search_count(), 1);
    }

    #[tokio::test]
    async fn hit_ignores_surrounding_whitespace() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, _) = engine_with(provider.clone());

        engine.search("Revival", "Zach Bryan").await.unwrap();
        engine.search("  Revival ", " Zach Bryan  ").await.unwrap();

        assert_eq!(provider.search_count(), 1);
    }

    // ── validation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn rejects_when_no_term_is_valid() {
        let provider = Arc::new(MockProvider::new(vec![song(1, "x", "y")]));
        let (engine, catalog) = engine_with(provider.clone());

        assert!(engine.search("", "").await.unwrap().is_empty());
        assert!(engine.search("ab", "").await.unwrap().is_empty());
        assert!(engine.search("ab", "xy").await.unwrap().is_empty());
        assert!(
            engine
                .search(&"a".repeat(41), "")
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(provider.search_count(), 0);
        assert_eq!(catalog.entry_count().unwrap(), 0);
        assert_eq!(engine.misses(), 0);
    }

    #[tokio::test]
    async fn one_valid_term_is_enough() {
        let provider = Arc::new(MockProvider::new(vec![song(1, "ab", "Zach Bryan")]));
        let (engine, _) = engine_with(provider.clone());

        // Song term too short on its own, but the artist term carries it.
        let results = engine.search("ab", "Zach Bryan").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(provider.search_count(), 1);

        engine.search("ab", "Zach Bryan").await.unwrap();
        assert_eq!(provider.search_count(), 1);
    }

    #[tokio::test]
    async fn oversized_built_key_is_stored_but_never_hit() {
        let provider = Arc::new(MockProvider::new(vec![song(1, "long", "Zach Bryan")]));
        let (engine, catalog) = engine_with(provider.clone());

        // A 40-char song term is valid, but "Song:" + term + "+Artist:..."
        // pushes the built key past the bound, so every search misses.
        let term = "a".repeat(40);
        engine.search(&term, "Zach Bryan").await.unwrap();
        engine.search(&term, "Zach Bryan").await.unwrap();

        assert_eq!(provider.search_count(), 2);
        assert_eq!(catalog.entry_count().unwrap(), 1);
        assert_eq!(engine.hits(), 0);
        assert_eq!(engine.misses(), 2);
    }

    // ── expiry ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stale_entry_goes_back_to_provider() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, catalog) = engine_with(provider.clone());
        let engine = engine.with_ttl(Duration::from_secs(1000));

        engine.search("Revival", "").await.unwrap();
        backdate(&catalog, "song:revival", 1001);

        engine.search("Revival", "").await.unwrap();
        assert_eq!(provider.search_count(), 2);

        // The refresh re-stamped the entry, so the next search hits.
        engine.search("Revival", "").await.unwrap();
        assert_eq!(provider.search_count(), 2);
    }

    #[tokio::test]
    async fn entry_exactly_ttl_old_still_serves() {
        let provider = Arc::new(MockProvider::new(vec![song(42, "Revival", "Zach Bryan")]));
        let (engine, catalog) = engine_with(provider.clone());
        let engine = engine.with_ttl(Duration::from_secs(1000));

        engine.search("Revival", "").await.unwrap();
        backdate(&catalog, "song:revival", 1000);

        engine.search("Revival", "").await.unwrap();
        assert_eq!(provider.search_count(), 1);
        assert_eq!(engine.hits(), 1);
    }

    // ── ranking ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn miss_returns_provider_order_and_hit_returns_ranked() {
        let provider = Arc::new(MockProvider::new(vec![
            song(1, "Eco", "Jorge Drexler"),
            song(3, "echo", "Incubus"),
            song(2, "Ech", "Frank Duval"),
        ]));
        let (engine, _) = engine_with(provider.clone());

        let cold: Vec<u64> = engine
            .search("echo", "")
            .await
            .unwrap()
            .iter()
            .map(|s| s.external_id)
            .collect();
        assert_eq!(cold, vec![1, 3, 2]);

        // Warm: exact match first, then the equidistant pair by ascending id.
        let warm: Vec<u64> = engine
            .search("echo", "")
            .await
            .unwrap()
            .iter()
            .map(|s| s.external_id)
            .collect();
        assert_eq!(warm, vec![3, 1, 2]);
        assert_eq!(provider.search_count(), 1);
    }

    #[tokio::test]
    async fn hit_ranking_uses_injected_metric() {
        struct Constant;
        impl Similarity for Constant {
            fn distance(&self, _: &str, _: &str) -> f64 {
                0.25
            }
        }

        let provider = Arc::new(MockProvider::new(vec![
            song(9, "Echo", "x"),
            song(4, "Drive", "x"),
        ]));
        let (engine, _) = engine_with(provider);
        let engine = engine.with_similarity(Arc::new(Constant));

        engine.search("Echo", "").await.unwrap();
        let warm: Vec<u64> = engine
            .search("Echo", "")
            .await
            .unwrap()
            .iter()
            .map(|s| s.external_id)
            .collect();
        assert_eq!(warm, vec![4, 9]);
    }

    // ── empty results ──────────────────────────────────────────────────

    #[tokio::test]
    async fn provider_failure_still_writes_a_valid_entry() {
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let (engine, catalog) = engine_with(provider.clone());

        let results = engine.search("Revival", "").await.unwrap();

        assert!(results.is_empty());
        assert_eq!(catalog.entry_count().unwrap(), 1);
        assert_eq!(catalog.song_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_hit_requeries_provider_until_results_arrive() {
        let provider = Arc::new(MockProvider::with_sequence(vec![
            Vec::new(),
            vec![song(42, "Revival", "Zach Bryan")],
        ]));
        let (engine, _) = engine_with(provider.clone());

        // First search caches an empty entry.
        assert!(engine.search("Revival", "").await.unwrap().is_empty());

        // The empty entry is fresh but falls through to the provider, which
        // now has results; the entry is refreshed with them.
        let second = engine.search("Revival", "").await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(provider.search_count(), 2);

        // From here on it is an ordinary hit.
        let third = engine.search("Revival", "").await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(provider.search_count(), 2);
        assert_eq!(engine.misses(), 2);
        assert_eq!(engine.hits(), 1);
    }

    // ── reconciliation ─────────────────────────────────────────────────

    #[tokio::test]
    async fn known_id_keeps_the_stored_record() {
        let mut stored = song(42, "Revival", "Zach Bryan");
        stored.album = "American Heartbreak".to_string();
        let mut variant = song(42, "Revival", "Zach Bryan");
        variant.album = "American Heartbreak (Deluxe)".to_string();

        let provider = Arc::new(MockProvider::new(vec![variant.clone()]));
        let (engine, catalog) = engine_with(provider);
        catalog.save_all(std::slice::from_ref(&stored)).unwrap();

        // The miss path echoes the provider's variant back...
        let cold = engine.search("Revival", "").await.unwrap();
        assert_eq!(cold[0].album, "American Heartbreak (Deluxe)");

        // ...but the cache kept the stored record, and no duplicate row
        // was created for the id.
        let warm = engine.search("Revival", "").await.unwrap();
        assert_eq!(warm[0].album, "American Heartbreak");
        assert_eq!(catalog.song_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_candidates_are_deduplicated_in_the_cache() {
        let provider = Arc::new(MockProvider::new(vec![
            song(42, "Revival", "Zach Bryan"),
            song(42, "Revival", "Zach Bryan"),
            song(7, "Oklahoma Smokeshow", "Zach Bryan"),
        ]));
        let (engine, catalog) = engine_with(provider);

        let cold = engine.search("Revival", "Zach Bryan").await.unwrap();
        assert_eq!(cold.len(), 3);

        let warm = engine.search("Revival", "Zach Bryan").await.unwrap();
        assert_eq!(warm.len(), 2);
        assert_eq!(catalog.song_count().unwrap(), 2);
    }

    // ── refresh outcomes ───────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_reports_created_then_updated() {
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let (engine, _) = engine_with(provider);

        let first = engine
            .refresh("Song:Revival", &[song(42, "Revival", "Zach Bryan")])
            .unwrap();
        assert_eq!(
            first,
            RefreshOutcome::Created {
                new_songs: 1,
                total: 1
            }
        );

        let second = engine
            .refresh(
                "Song:Revival",
                &[
                    song(42, "Revival", "Zach Bryan"),
                    song(7, "Oklahoma Smokeshow", "Zach Bryan"),
                ],
            )
            .unwrap();
        assert_eq!(
            second,
            RefreshOutcome::Updated {
                new_songs: 1,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn refresh_with_blank_key_is_skipped() {
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let (engine, catalog) = engine_with(provider);

        let outcome = engine.refresh("   ", &[song(1, "x", "y")]).unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped);
        assert_eq!(catalog.entry_count().unwrap(), 0);
    }

    // ── previews ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn preview_updates_the_stored_song() {
        let mut stored = song(42, "Revival", "Zach Bryan");
        stored.preview_url = Some("https://cdn.example/stale.mp3".to_string());

        let provider = Arc::new(
            MockProvider::new(Vec::new()).with_preview(42, "https://cdn.example/fresh.mp3"),
        );
        let (engine, catalog) = engine_with(provider);
        catalog.save_all(std::slice::from_ref(&stored)).unwrap();

        let url = engine.preview(42).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.example/fresh.mp3"));

        let refreshed = catalog.find_by_external_id(42).unwrap().unwrap();
        assert_eq!(
            refreshed.preview_url.as_deref(),
            Some("https://cdn.example/fresh.mp3")
        );
    }

    #[tokio::test]
    async fn preview_falls_back_to_stored_link_when_provider_has_none() {
        let mut stored = song(42, "Revival", "Zach Bryan");
        stored.preview_url = Some("https://cdn.example/last-known.mp3".to_string());

        let provider = Arc::new(MockProvider::new(Vec::new()));
        let (engine, catalog) = engine_with(provider);
        catalog.save_all(std::slice::from_ref(&stored)).unwrap();

        let url = engine.preview(42).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.example/last-known.mp3"));
    }

    #[tokio::test]
    async fn preview_for_unknown_song_is_none() {
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let (engine, _) = engine_with(provider);
        assert!(engine.preview(404).await.unwrap().is_none());
    }
}
