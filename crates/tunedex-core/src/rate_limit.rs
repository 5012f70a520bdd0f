//! Adaptive rate limiting for provider requests.
//!
//! Every provider call waits for a governor permit via `until_ready()`,
//! which spaces requests at the configured rate. On 429 the governor is
//! swapped to a slower rate and the request is retried once after honoring
//! Retry-After.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Error raised while talking to a search provider.
///
/// These never cross the engine boundary: the provider logs them and
/// degrades to an empty result, keeping provider outages indistinguishable
/// from a search with no matches.
#[derive(Debug)]
pub enum ProviderError {
    /// Server returned 429 Too Many Requests.
    RateLimited { retry_after: Option<Duration> },
    /// Transport-level failure (connect, timeout, TLS).
    Http(reqwest::Error),
    /// Response body did not have the expected shape.
    Payload(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "Rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            ProviderError::RateLimited { retry_after: None } => write!(f, "Rate limited (429)"),
            ProviderError::Http(e) => write!(f, "{}", e),
            ProviderError::Payload(msg) => write!(f, "Unexpected payload: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e)
    }
}

/// Rate limiter with adaptive rate adjustment via ArcSwap.
///
/// When a 429 is received, the governor is atomically swapped to a slower
/// rate. After a cooldown period (60s) with no 429s, the original rate is
/// restored.
pub struct AdaptiveRateLimiter {
    limiter: ArcSwap<DirectLimiter>,
    /// Base period between allowed requests.
    base_period: Duration,
    /// Current slowdown factor (1 = normal, 2 = half rate, etc.).
    current_factor: AtomicU32,
    /// Timestamp of the last 429 response.
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl AdaptiveRateLimiter {
    /// Create a new limiter with the given period between requests.
    pub fn new(period: Duration) -> Self {
        let quota = Quota::with_period(period).expect("period must be > 0");
        let limiter = Arc::new(DirectLimiter::direct(quota));
        Self {
            limiter: ArcSwap::from(limiter),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Create a limiter allowing `n` requests per second (capped at 1000).
    pub fn per_second(n: u32) -> Self {
        let ms = (1000 / n.max(1) as u64).max(1);
        Self::new(Duration::from_millis(ms))
    }

    /// Wait until the rate limiter allows a request.
    ///
    /// Blocks the calling future until a token is available. This naturally
    /// spaces requests at the configured rate across all concurrent callers.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called when a 429 is received. Doubles the slowdown factor and swaps
    /// the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            let new_limiter = Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(new_limiter);
            tracing::debug!(factor, "slowed provider rate limiter");
        }
    }

    /// If 60s have passed since the last 429, restore the original rate.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            let limiter = Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(limiter);
            tracing::debug!("restored provider rate limiter to base rate");
        }
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
///
/// Returns `Err(ProviderError::RateLimited { .. })` if 429, `Ok(())` otherwise.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), ProviderError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(ProviderError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    // Try parsing as integer seconds first
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // Try parsing as HTTP-date (e.g. "Wed, 21 Oct 2015 07:28:00 GMT")
    // For simplicity, just use a conservative fallback if it looks like a date
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Run a provider request under the governor, retrying once on 429.
///
/// 1. Acquires a governor permit (waits if needed)
/// 2. Runs `attempt`
/// 3. On 429: adapts the governor, honors Retry-After capped at `timeout`,
///    re-acquires a permit, and retries exactly once
/// 4. On other errors or success: returns immediately
pub async fn with_rate_limit_retry<T, Fut>(
    limiter: &AdaptiveRateLimiter,
    timeout: Duration,
    attempt: impl Fn() -> Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    limiter.acquire().await;

    match attempt().await {
        Err(ProviderError::RateLimited { retry_after }) => {
            // Adapt the governor so subsequent requests are throttled
            limiter.on_rate_limited();

            // Honor Retry-After, capped at the request timeout
            let wait = retry_after.unwrap_or(Duration::from_secs(2));
            let wait = wait.min(timeout);
            tracing::info!(
                wait_secs = wait.as_secs_f64(),
                "429 rate limited, waiting then retrying"
            );
            tokio::time::sleep(wait).await;

            // Re-acquire a permit after sleeping, then retry once. A second
            // 429 goes back to the caller.
            limiter.acquire().await;
            attempt().await
        }
        other => other,
    }
}
