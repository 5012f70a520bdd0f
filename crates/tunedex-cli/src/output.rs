use std::io::Write;
use std::path::Path;

use owo_colors::OwoColorize;
use tunedex_core::Song;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print ranked search results as numbered blocks.
pub fn print_search_results(
    w: &mut dyn Write,
    results: &[Song],
    from_cache: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    if results.is_empty() {
        writeln!(w, "No songs found.")?;
        return Ok(());
    }

    writeln!(w, "Found {} songs", results.len())?;
    if from_cache {
        if color.enabled() {
            writeln!(w, "{}", "(served from cache)".dimmed())?;
        } else {
            writeln!(w, "(served from cache)")?;
        }
    }
    writeln!(w)?;

    for (i, song) in results.iter().enumerate() {
        let length = fmt_duration(song.duration_secs);
        if color.enabled() {
            writeln!(
                w,
                "{} {} ({})",
                format!("[{}]", i + 1).bold().yellow(),
                song.title.bold(),
                length
            )?;
        } else {
            writeln!(w, "[{}] {} ({})", i + 1, song.title, length)?;
        }

        writeln!(w, "  Artist:  {}", song.artist)?;
        if !song.album.is_empty() {
            writeln!(w, "  Album:   {}", song.album)?;
        }
        writeln!(w, "  Track:   {}", song.external_id)?;

        if let Some(ref url) = song.preview_url {
            if color.enabled() {
                writeln!(w, "  Preview: {}", url.dimmed())?;
            } else {
                writeln!(w, "  Preview: {}", url)?;
            }
        }

        writeln!(w)?;
    }

    Ok(())
}

/// Print the preview link for a track, or a notice when there is none.
pub fn print_preview(
    w: &mut dyn Write,
    track_id: u64,
    url: Option<&str>,
    color: ColorMode,
) -> std::io::Result<()> {
    match url {
        Some(url) => {
            writeln!(w, "Preview for track {}:", track_id)?;
            if color.enabled() {
                writeln!(w, "  {}", url.cyan())?;
            } else {
                writeln!(w, "  {}", url)?;
            }
        }
        None => {
            let msg = format!("No preview available for track {}", track_id);
            if color.enabled() {
                writeln!(w, "{}", msg.yellow())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
    }
    Ok(())
}

/// Print catalog and query cache counts.
pub fn print_stats(
    w: &mut dyn Write,
    path: &Path,
    songs: u64,
    entries: u64,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "Catalog:".bold(), path.display())?;
    } else {
        writeln!(w, "Catalog: {}", path.display())?;
    }
    writeln!(w, "  Songs: {}", songs)?;
    writeln!(w, "  Cached queries: {}", entries)?;
    Ok(())
}

/// Print the result of clearing the song catalog.
pub fn print_clear_summary(
    w: &mut dyn Write,
    path: &Path,
    removed: u64,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "Removed {} songs from {}", removed, path.display())?;
    let note = "Cached queries remain and refill from the provider on their next search.";
    if color.enabled() {
        writeln!(w, "{}", note.dimmed())?;
    } else {
        writeln!(w, "{}", note)?;
    }
    Ok(())
}

/// Format a track length as m:ss.
fn fmt_duration(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
