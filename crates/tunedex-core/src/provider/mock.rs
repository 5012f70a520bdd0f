//! Mock search provider for testing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::SearchProvider;
use crate::Song;

/// A hand-rolled mock implementing [`SearchProvider`] for tests.
///
/// Supports:
/// - A fixed result set (used for every search), **or**
/// - A sequence of result sets (one per search, repeating the last when
///   exhausted).
/// - Optional per-call latency.
/// - Call counting via [`search_count()`](MockProvider::search_count) and
///   [`preview_count()`](MockProvider::preview_count).
///
/// An empty result set doubles as a provider failure, since the real
/// provider absorbs its errors into empty results.
pub struct MockProvider {
    /// If non-empty, each search pops the next result set.
    responses: Mutex<Vec<Vec<Song>>>,
    /// Fallback when the sequence is exhausted (or single-response mode).
    fallback: Vec<Song>,
    previews: HashMap<u64, String>,
    delay: Option<Duration>,
    search_count: AtomicUsize,
    preview_count: AtomicUsize,
}

impl MockProvider {
    /// Create a mock whose every search returns `results`.
    pub fn new(results: Vec<Song>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: results,
            previews: HashMap::new(),
            delay: None,
            search_count: AtomicUsize::new(0),
            preview_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that returns result sets in order, repeating the last.
    pub fn with_sequence(mut responses: Vec<Vec<Song>>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        let fallback = responses.first().cloned().unwrap();
        Self {
            responses: Mutex::new(responses),
            fallback,
            previews: HashMap::new(),
            delay: None,
            search_count: AtomicUsize::new(0),
            preview_count: AtomicUsize::new(0),
        }
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a preview URL for a track id.
    pub fn with_preview(mut self, external_id: u64, url: &str) -> Self {
        self.previews.insert(external_id, url.to_string());
        self
    }

    /// How many times `search()` has been called.
    pub fn search_count(&self) -> usize {
        self.search_count.load(Ordering::SeqCst)
    }

    /// How many times `preview()` has been called.
    pub fn preview_count(&self) -> usize {
        self.preview_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Vec<Song> {
        let mut seq = self.responses.lock().unwrap();
        if let Some(resp) = seq.pop() {
            resp
        } else {
            self.fallback.clone()
        }
    }
}

impl SearchProvider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    fn search<'a>(
        &'a self,
        _song_term: &'a str,
        _artist_term: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<Song>> + Send + 'a>> {
        self.search_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            response
        })
    }

    fn preview<'a>(
        &'a self,
        external_id: u64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        self.preview_count.fetch_add(1, Ordering::SeqCst);
        let preview = self.previews.get(&external_id).cloned();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            preview
        })
    }
}
