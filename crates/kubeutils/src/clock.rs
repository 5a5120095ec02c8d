//! Per-wait timeout clock

use std::time::Duration;

use tokio::time::Instant;

/// Monotonic start timestamp plus the timeout that bounds one wait.
///
/// Every wait owns its own clock; clocks are never shared between
/// operations. Uses tokio's clock so paused-time tests drive it.
#[derive(Clone, Copy, Debug)]
pub struct WaitClock {
    start: Instant,
    timeout: Duration,
}

impl WaitClock {
    /// Start a clock now
    pub fn start(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Time since the clock started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// The configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the elapsed time is strictly past the timeout
    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_only_after_timeout_is_exceeded() {
        let clock = WaitClock::start(Duration::from_secs(10));
        assert!(!clock.is_expired());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!clock.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(clock.is_expired());
        assert_eq!(clock.timeout(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_expires_as_soon_as_time_moves() {
        let clock = WaitClock::start(Duration::ZERO);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(clock.is_expired());
    }
}
