//! Bounded retry with linear backoff for rate-limited origin calls.

use crate::error::{ScrapeError, ScrapeResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry settings
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `base_delay * n`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &shared::config::ScraperConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation`, retrying only when it reports rate limiting
    ///
    /// Any other error is returned immediately. Once the ceiling is exhausted a
    /// [`ScrapeError::RateLimited`] carrying the attempt count is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> ScrapeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(e) if e.is_rate_limited() => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(what = what, attempts = attempt, "Rate limited, giving up");
                        return Err(ScrapeError::RateLimited { attempts: attempt });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        what = what,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited by origin, backing off"
                    );
                    sleep(delay).await;
                }
                other => {
                    if attempt > 0 {
                        debug!(what = what, attempts = attempt + 1, "Recovered after retry");
                    }
                    return other;
                }
            }
        }
    }
}
