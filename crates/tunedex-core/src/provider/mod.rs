//! Search provider trait and implementations.

pub mod deezer;
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use crate::Song;

/// A remote catalog that can be searched for songs.
///
/// Implementations absorb their own failures: a provider that errors out
/// logs the cause and resolves to an empty result, so callers cannot tell a
/// provider outage from a search with no matches. Store failures, by
/// contrast, do surface to callers.
pub trait SearchProvider: Send + Sync {
    /// The canonical name of this provider (e.g., "Deezer").
    fn name(&self) -> &str;

    /// Search for songs matching the given terms. Either term may be blank,
    /// but not both.
    fn search<'a>(
        &'a self,
        song_term: &'a str,
        artist_term: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<Song>> + Send + 'a>>;

    /// Fetch a fresh preview clip URL for a song. Preview links served by
    /// providers expire, so these are re-fetched on demand rather than
    /// trusted from the catalog.
    fn preview<'a>(
        &'a self,
        external_id: u64,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
}
