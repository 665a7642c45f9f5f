//! Outbound request pacing.
//!
//! One `Pacer` per client instance models the provider's single rate budget:
//! every request from that instance, whichever task issues it, waits here
//! first. The lock is held across the wait, so the read of the last request
//! time and the write of the new one are one atomic step and concurrent
//! callers queue up behind each other.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Provider ceiling.
pub const REQUESTS_PER_SECOND: u64 = 3;

/// ⌈1000 / 3⌉ ms between consecutive outbound requests.
pub const MIN_REQUEST_INTERVAL: Duration =
    Duration::from_millis((1000 + REQUESTS_PER_SECOND - 1) / REQUESTS_PER_SECOND);

pub struct Pacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// request, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(MIN_REQUEST_INTERVAL)
    }
}
