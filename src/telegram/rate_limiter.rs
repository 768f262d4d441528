//! Send pacing for Telegram API calls.
//!
//! Group messages, document uploads and invite-link exports share one
//! pacing gate per bot instance so bursts of maintenance work do not
//! trigger Telegram's flood wait errors.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Enforces a minimum interval between transport operations.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Last time an operation was performed.
    last_operation: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_operation: Mutex::new(None),
        }
    }

    /// Creates a rate limiter from seconds.
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Waits until an operation is allowed, then marks it as performed.
    ///
    /// Returns the duration waited (zero if no wait was needed).
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut last = self.last_operation.lock().await;

        let wait_duration = match *last {
            Some(last_time) => self
                .min_interval
                .saturating_sub(last_time.elapsed()),
            None => Duration::ZERO,
        };

        if !wait_duration.is_zero() {
            debug!("Pacing send: waiting {:?}", wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        *last = Some(Instant::now());
        wait_duration
    }

    /// Checks if an operation is currently allowed without blocking.
    pub async fn is_allowed(&self) -> bool {
        let last = self.last_operation.lock().await;
        match *last {
            Some(last_time) => last_time.elapsed() >= self.min_interval,
            None => true,
        }
    }

    /// Sleeps out a flood wait reported by Telegram, then restarts the
    /// pacing window.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Flood wait from Telegram: {} seconds", wait_seconds);
        tokio::time::sleep(Duration::from_secs(u64::from(wait_seconds))).await;

        let mut last = self.last_operation.lock().await;
        *last = Some(Instant::now());
    }

    /// Resets the limiter, allowing an immediate operation.
    pub async fn reset(&self) {
        let mut last = self.last_operation.lock().await;
        *last = None;
    }
}
