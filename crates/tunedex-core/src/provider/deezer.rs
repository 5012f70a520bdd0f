//! Deezer search provider.
//!
//! Uses the public search API with an advanced query expression
//! (`track:"..." artist:"..."`) and strict matching, so Deezer does not
//! broaden the search with its own fuzzy fallbacks. Preview clip URLs in
//! search results expire after about a day, which is why
//! [`preview`](super::SearchProvider::preview) re-fetches them from the
//! track endpoint instead of reusing the stored value.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::SearchProvider;
use crate::Song;
use crate::rate_limit::{
    AdaptiveRateLimiter, ProviderError, check_rate_limit_response, with_rate_limit_retry,
};

pub const DEEZER_BASE_URL: &str = "https://api.deezer.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deezer's documented quota is 50 requests per rolling 5 seconds.
const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

pub struct DeezerProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    limiter: AdaptiveRateLimiter,
}

impl DeezerProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEEZER_BASE_URL)
    }

    /// Point the provider at a different host (stand-in servers in tests,
    /// API-compatible mirrors).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            limiter: AdaptiveRateLimiter::per_second(DEFAULT_REQUESTS_PER_SECOND),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_requests_per_second(mut self, n: u32) -> Self {
        self.limiter = AdaptiveRateLimiter::per_second(n);
        self
    }

    fn search_url(&self, song_term: &str, artist_term: &str) -> String {
        let expr = search_expression(song_term, artist_term);
        format!(
            "{}/search?q={}&strict=on",
            self.base_url,
            urlencoding::encode(&expr)
        )
    }

    async fn fetch_search(&self, url: &str) -> Result<Vec<Song>, ProviderError> {
        let resp = self.client.get(url).timeout(self.timeout).send().await?;
        check_rate_limit_response(&resp)?;
        let payload: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_search_payload(&payload)
    }

    async fn fetch_preview(&self, external_id: u64) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/track/{}", self.base_url, external_id);
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        check_rate_limit_response(&resp)?;
        let payload: serde_json::Value = resp.error_for_status()?.json().await?;
        if let Some(err) = api_error(&payload) {
            return Err(err);
        }
        Ok(payload["preview"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from))
    }
}

impl Default for DeezerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchProvider for DeezerProvider {
    fn name(&self) -> &str {
        "Deezer"
    }

    fn search<'a>(
        &'a self,
        song_term: &'a str,
        artist_term: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<Song>> + Send + 'a>> {
        Box::pin(async move {
            if song_term.trim().is_empty() && artist_term.trim().is_empty() {
                return Vec::new();
            }
            let url = self.search_url(song_term, artist_term);
            match with_rate_limit_retry(&self.limiter, self.timeout, || self.fetch_search(&url))
                .await
            {
                Ok(songs) => {
                    tracing::debug!(count = songs.len(), "deezer search returned");
                    songs
                }
                Err(e) => {
                    tracing::warn!(error = %e, "deezer search failed");
                    Vec::new()
                }
            }
        })
    }

    fn preview<'a>(
        &'a self,
        external_id: u64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            match with_rate_limit_retry(&self.limiter, self.timeout, || {
                self.fetch_preview(external_id)
            })
            .await
            {
                Ok(preview) => preview,
                Err(e) => {
                    tracing::warn!(external_id, error = %e, "deezer preview fetch failed");
                    None
                }
            }
        })
    }
}

/// Compose the advanced search expression Deezer expects.
///
/// Non-blank terms contribute their own clause, trimmed:
/// `track:"<song>" artist:"<artist>"`.
fn search_expression(song_term: &str, artist_term: &str) -> String {
    let mut clauses = Vec::with_capacity(2);
    let song = song_term.trim();
    let artist = artist_term.trim();
    if !song.is_empty() {
        clauses.push(format!("track:\"{song}\""));
    }
    if !artist.is_empty() {
        clauses.push(format!("artist:\"{artist}\""));
    }
    clauses.join(" ")
}

/// Deezer reports failures as 200 responses with an `error` object.
fn api_error(payload: &serde_json::Value) -> Option<ProviderError> {
    let err = payload.get("error")?;
    let msg = err["message"].as_str().unwrap_or("unknown");
    Some(ProviderError::Payload(format!("api error: {msg}")))
}

fn parse_search_payload(payload: &serde_json::Value) -> Result<Vec<Song>, ProviderError> {
    if let Some(err) = api_error(payload) {
        return Err(err);
    }
    let Some(items) = payload["data"].as_array() else {
        return Err(ProviderError::Payload("missing data array".into()));
    };
    // Items missing an id, title, or artist are dropped; one malformed
    // result should not sink the rest of the page.
    let songs: Vec<Song> = items.iter().filter_map(parse_song).collect();
    if songs.len() < items.len() {
        tracing::debug!(
            dropped = items.len() - songs.len(),
            "skipped malformed search results"
        );
    }
    Ok(songs)
}

fn parse_song(item: &serde_json::Value) -> Option<Song> {
    Some(Song {
        external_id: item["id"].as_u64()?,
        title: item["title"].as_str()?.to_string(),
        duration_secs: item["duration"].as_u64().unwrap_or(0) as u32,
        artist: item["artist"]["name"].as_str()?.to_string(),
        artist_id: item["artist"]["id"].as_u64().unwrap_or(0),
        album: item["album"]["title"].as_str().unwrap_or("").to_string(),
        album_id: item["album"]["id"].as_u64().unwrap_or(0),
        artwork_url: item["album"]["cover"].as_str().map(String::from),
        preview_url: item["preview"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from),
    })
}
