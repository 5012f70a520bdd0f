//! Relevance ranking for cached search results.
//!
//! Results served from the cache are re-ordered against the query on every
//! request instead of being stored pre-sorted, so one cache entry can serve
//! both a song-led and an artist-led ordering of the same candidate set.

use crate::Song;

/// Distance metric between a candidate field and a query term.
///
/// Implementations return a normalized distance in `[0.0, 1.0]` where `0.0`
/// is an exact match. The engine only ever compares distances, so any metric
/// with that contract can be swapped in.
pub trait Similarity: Send + Sync {
    fn distance(&self, candidate: &str, term: &str) -> f64;
}

/// Jaro-Winkler distance, which rewards agreement on leading characters.
/// A good fit for song search: people usually type the start of a title.
pub struct JaroWinkler;

impl Similarity for JaroWinkler {
    fn distance(&self, candidate: &str, term: &str) -> f64 {
        rapidfuzz::distance::jaro_winkler::normalized_distance(candidate.chars(), term.chars())
    }
}

/// Order candidates by relevance to the query terms.
///
/// The song term takes precedence: when it is non-blank, every candidate's
/// title is scored against it; otherwise each candidate's artist name is
/// scored against the artist term. Both terms blank means there is nothing
/// to rank against and the result is empty.
///
/// Comparison is over the raw strings as typed and as returned by the
/// provider. Sorting is ascending by distance with ties broken by ascending
/// external id, so equal-distance candidates come back in the same order
/// regardless of input order.
pub fn rank(
    songs: Vec<Song>,
    song_term: &str,
    artist_term: &str,
    metric: &dyn Similarity,
) -> Vec<Song> {
    let (term, by_title) = if !song_term.trim().is_empty() {
        (song_term, true)
    } else if !artist_term.trim().is_empty() {
        (artist_term, false)
    } else {
        return Vec::new();
    };

    let mut scored: Vec<(f64, Song)> = songs
        .into_iter()
        .map(|song| {
            let field = if by_title { &song.title } else { &song.artist };
            (metric.distance(field, term), song)
        })
        .collect();

    scored.sort_by(|(dist_a, a), (dist_b, b)| {
        dist_a
            .total_cmp(dist_b)
            .then_with(|| a.external_id.cmp(&b.external_id))
    });

    scored.into_iter().map(|(_, song)| song).collect()
}
