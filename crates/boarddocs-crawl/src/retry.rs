//! Bounded retry for flaky page interactions

use std::future::Future;
use std::time::Duration;

use boarddocs_core::{Result, RetrySettings, ScrapeError};
use tracing::{debug, warn};

/// How often, and with what selector timeout, to retry an interaction
///
/// Attempt `n` (counting from zero) waits `base_timeout + n * timeout_step`
/// for its selectors. Only [`ScrapeError::SelectorTimeout`] is retried; the
/// failure of the last attempt is returned as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    pub timeout_step: Duration,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout + self.timeout_step * attempt
    }

    pub async fn run<F, Fut, T>(&self, what: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32, Duration) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let timeout = self.timeout_for(attempt);
            match attempt_fn(attempt, timeout).await {
                Ok(value) => return Ok(value),
                Err(e @ ScrapeError::SelectorTimeout { .. }) if attempt + 1 < self.max_attempts => {
                    debug!("Retrying {} after attempt {}: {}", what, attempt + 1, e);
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_timeout() {
                        warn!("Giving up on {} after {} attempts", what, attempt + 1);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_timeout: Duration::from_millis(settings.base_timeout_ms),
            timeout_step: Duration::from_millis(settings.timeout_step_ms),
            pause: Duration::from_millis(settings.pause_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}
