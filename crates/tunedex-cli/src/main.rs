use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tunedex_core::config_file::{self, CacheConfig};
use tunedex_core::{
    CacheEntryStore, DeezerProvider, MAX_QUERY_LEN, MIN_QUERY_LEN, SearchEngine, SongStore,
    SqliteCatalog, build_catalog, is_valid_term,
};

mod output;

use output::ColorMode;

/// Tunedex - Search for songs with a local catalog and seven-day query cache
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for songs by title, artist, or both
    Search {
        /// Song title to search for
        song: Option<String>,

        /// Artist name to search for
        #[arg(short, long)]
        artist: Option<String>,

        /// Path to the catalog database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Search provider API base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Provider request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Provider request budget per second
        #[arg(long)]
        requests_per_second: Option<u32>,

        /// Days before a cached query is considered stale
        #[arg(long)]
        ttl_days: Option<u64>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Path to output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch a fresh preview clip URL for a track
    Preview {
        /// Provider track id (shown in search results)
        track_id: u64,

        /// Path to the catalog database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Search provider API base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Provider request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Path to output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show catalog and query cache counts
    Stats {
        /// Path to the catalog database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Path to output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove every song from the catalog
    ClearCache {
        /// Path to the catalog database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Path to output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Search {
            song,
            artist,
            cache,
            base_url,
            timeout,
            requests_per_second,
            ttl_days,
            no_color,
            output,
        } => {
            search(
                song,
                artist,
                cache,
                base_url,
                timeout,
                requests_per_second,
                ttl_days,
                no_color,
                output,
            )
            .await
        }
        Command::Preview {
            track_id,
            cache,
            base_url,
            timeout,
            no_color,
            output,
        } => preview(track_id, cache, base_url, timeout, no_color, output).await,
        Command::Stats {
            cache,
            no_color,
            output,
        } => stats(cache, no_color, output),
        Command::ClearCache {
            cache,
            no_color,
            output,
        } => clear_cache(cache, no_color, output),
    }
}

/// Send library logs to stderr so they never mix into piped output.
/// `RUST_LOG` overrides the default `warn` filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[allow(clippy::too_many_arguments)]
async fn search(
    song: Option<String>,
    artist: Option<String>,
    cache: Option<PathBuf>,
    base_url: Option<String>,
    timeout: Option<u64>,
    requests_per_second: Option<u32>,
    ttl_days: Option<u64>,
    no_color: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let song = song.unwrap_or_default();
    let artist = artist.unwrap_or_default();
    if !is_valid_term(&song) && !is_valid_term(&artist) {
        anyhow::bail!(
            "Nothing to search: give a song title or an artist name of {} to {} characters",
            MIN_QUERY_LEN,
            MAX_QUERY_LEN
        );
    }

    // Determine color mode and output writer
    let use_color = !no_color && output.is_none();
    let color = ColorMode(use_color);

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };

    let engine = build_engine(cache, base_url, timeout, requests_per_second, ttl_days);
    let results = engine.search(&song, &artist).await?;
    let from_cache = engine.hits() > 0;

    output::print_search_results(&mut writer, &results, from_cache, color)?;

    Ok(())
}

async fn preview(
    track_id: u64,
    cache: Option<PathBuf>,
    base_url: Option<String>,
    timeout: Option<u64>,
    no_color: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let use_color = !no_color && output.is_none();
    let color = ColorMode(use_color);

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };

    let engine = build_engine(cache, base_url, timeout, None, None);
    let url = engine.preview(track_id).await?;

    output::print_preview(&mut writer, track_id, url.as_deref(), color)?;

    Ok(())
}

fn stats(cache: Option<PathBuf>, no_color: bool, output: Option<PathBuf>) -> anyhow::Result<()> {
    let use_color = !no_color && output.is_none();
    let color = ColorMode(use_color);

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };

    let (path, catalog) = open_catalog(cache)?;
    let songs = catalog.song_count()?;
    let entries = catalog.entry_count()?;

    output::print_stats(&mut writer, &path, songs, entries, color)?;

    Ok(())
}

fn clear_cache(
    cache: Option<PathBuf>,
    no_color: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let use_color = !no_color && output.is_none();
    let color = ColorMode(use_color);

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };

    let (path, catalog) = open_catalog(cache)?;
    let removed = catalog.song_count()?;
    catalog.clear_songs()?;

    output::print_clear_summary(&mut writer, &path, removed, color)?;

    Ok(())
}

/// Build a search engine wired to the Deezer provider and the catalog.
///
/// Missing settings fall back to an in-memory catalog and provider
/// defaults, so a first run needs no setup at all.
fn build_engine(
    cache: Option<PathBuf>,
    base_url: Option<String>,
    timeout: Option<u64>,
    requests_per_second: Option<u32>,
    ttl_days: Option<u64>,
) -> SearchEngine {
    // Resolve configuration: CLI flags > env vars > config file > defaults
    let file_config = config_file::load_config();
    let provider_cfg = file_config.provider.unwrap_or_default();
    let cache_cfg = file_config.cache.unwrap_or_default();

    let base_url = base_url
        .or_else(|| std::env::var("DEEZER_BASE_URL").ok())
        .or(provider_cfg.base_url);
    let timeout_secs = timeout
        .or_else(|| {
            std::env::var("PROVIDER_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .or(provider_cfg.timeout_secs);
    let requests_per_second = requests_per_second.or(provider_cfg.requests_per_second);
    let ttl_days = ttl_days
        .or_else(|| {
            std::env::var("CACHE_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .or(cache_cfg.ttl_days);

    let mut provider = match base_url {
        Some(url) => DeezerProvider::with_base_url(url),
        None => DeezerProvider::new(),
    };
    if let Some(secs) = timeout_secs {
        provider = provider.with_timeout(Duration::from_secs(secs));
    }
    if let Some(rps) = requests_per_second {
        provider = provider.with_requests_per_second(rps);
    }

    let path = catalog_path(cache, &cache_cfg);
    let (songs, entries) = build_catalog(path.as_deref());

    let engine = SearchEngine::new(songs, entries, Arc::new(provider));
    match ttl_days {
        Some(days) => engine.with_ttl(Duration::from_secs(days * 24 * 60 * 60)),
        None => engine,
    }
}

/// Open the catalog for a maintenance command.
///
/// Unlike [`build_engine`] this never falls back to an in-memory store:
/// the catalog file must already exist.
fn open_catalog(cache: Option<PathBuf>) -> anyhow::Result<(PathBuf, SqliteCatalog)> {
    let cache_cfg = config_file::load_config().cache.unwrap_or_default();
    let Some(path) = catalog_path(cache, &cache_cfg) else {
        anyhow::bail!("No catalog path configured; pass --cache <path>");
    };
    if !path.exists() {
        anyhow::bail!(
            "No catalog found at {}. Run 'tunedex-cli search' first to create one.",
            path.display()
        );
    }
    let catalog = SqliteCatalog::open(&path)?;
    Ok((path, catalog))
}

/// Catalog path: --cache flag > TUNEDEX_CACHE env var > config file >
/// platform data directory.
fn catalog_path(flag: Option<PathBuf>, cache_cfg: &CacheConfig) -> Option<PathBuf> {
    flag.or_else(|| std::env::var("TUNEDEX_CACHE").ok().map(PathBuf::from))
        .or_else(|| cache_cfg.path.as_deref().map(PathBuf::from))
        .or_else(|| dirs::data_dir().map(|d| d.join("tunedex").join("catalog.db")))
}
