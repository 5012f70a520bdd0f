//! Canonical query key construction and validation.
//!
//! A search for a song named "echo" and a search for an artist named "echo"
//! must land in different cache entries, so the key builder tags each term
//! before joining them: `Song:echo` vs `Artist:echo`. Keys are trimmed and
//! lower-cased before storage so lookups are case-insensitive.

/// Minimum length of a valid query term, in characters.
pub const MIN_QUERY_LEN: usize = 3;

/// Maximum length of a valid query term, in characters.
///
/// The same bound is applied to built keys before a cache lookup, so a key
/// whose tags push it past this limit never hits the cache.
pub const MAX_QUERY_LEN: usize = 40;

/// Check whether a single search term is usable.
///
/// A term is valid when it is non-blank after trimming and its character
/// count falls within [`MIN_QUERY_LEN`]..=[`MAX_QUERY_LEN`].
pub fn is_valid_term(term: &str) -> bool {
    if term.trim().is_empty() {
        return false;
    }
    let len = term.chars().count();
    (MIN_QUERY_LEN..=MAX_QUERY_LEN).contains(&len)
}

/// Build the canonical cache key for a song/artist search pair.
///
/// Both terms are trimmed first; any non-empty term is included, tagged:
/// - both present → `Song:<song>+Artist:<artist>`
/// - song only → `Song:<song>`
/// - artist only → `Artist:<artist>`
///
/// Returns `None` when both terms are empty, which callers treat as an
/// unkeyable search rather than an error.
pub fn build_query_key(song_term: &str, artist_term: &str) -> Option<String> {
    let song = song_term.trim();
    let artist = artist_term.trim();
    if !song.is_empty() && !artist.is_empty() {
        Some(format!("Song:{song}+Artist:{artist}"))
    } else if !song.is_empty() {
        Some(format!("Song:{song}"))
    } else if !artist.is_empty() {
        Some(format!("Artist:{artist}"))
    } else {
        None
    }
}

/// Normalize a key for storage and lookup: trim, then lower-case.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}
