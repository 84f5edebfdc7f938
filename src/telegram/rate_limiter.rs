//! Request pacing for one Telegram account.
//!
//! History scans issue many requests in a row. Every request waits for a
//! minimum spacing, and a `FLOOD_WAIT` answer blocks the limiter for the
//! whole penalty so that no request is sent before Telegram allows it.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Slots {
    last_request: Option<Instant>,
    blocked_until: Option<Instant>,
}

/// Enforces a minimum interval between requests plus flood-wait penalties.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    slots: Mutex<Slots>,
}

impl RateLimiter {
    /// Creates a limiter with the given spacing between requests.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Waits until a request is allowed and claims the slot.
    ///
    /// Returns how long the caller waited.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut slots = self.slots.lock().await;

        let wait = Self::remaining(&slots, self.min_interval, Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before next request", wait);
            tokio::time::sleep(wait).await;
        }

        slots.last_request = Some(Instant::now());
        slots.blocked_until = None;
        wait
    }

    /// Blocks every request for `wait_seconds` after a `FLOOD_WAIT` answer.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Received flood wait from Telegram: {} seconds", wait_seconds);

        let until = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        let mut slots = self.slots.lock().await;
        slots.blocked_until = Some(slots.blocked_until.map_or(until, |current| current.max(until)));
    }

    fn remaining(slots: &Slots, min_interval: Duration, now: Instant) -> Duration {
        let spacing = slots
            .last_request
            .map_or(Duration::ZERO, |last| {
                min_interval.saturating_sub(now.saturating_duration_since(last))
            });
        let penalty = slots
            .blocked_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
        spacing.max(penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn time_until_allowed(limiter: &RateLimiter) -> Duration {
        let slots = limiter.slots.lock().await;
        RateLimiter::remaining(&slots, limiter.min_interval, Instant::now())
    }

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        assert_eq!(time_until_allowed(&limiter).await, Duration::ZERO);
        assert_eq!(limiter.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        limiter.wait_and_acquire().await;
        let remaining = time_until_allowed(&limiter).await;
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.wait_and_acquire().await;
        assert_eq!(limiter.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_flood_wait_blocks_requests() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.handle_flood_wait(30).await;

        let remaining = time_until_allowed(&limiter).await;
        assert!(remaining > Duration::from_secs(29));

        // A shorter penalty does not shorten an active one.
        limiter.handle_flood_wait(1).await;
        assert!(time_until_allowed(&limiter).await > Duration::from_secs(29));
    }
}
