//! Bounded waiting primitives
//!
//! Every suspension in the harness carries an upper bound. Polling loops are
//! written against a [`Deadline`] so the bound is computed once and shared by
//! every attempt inside the loop.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self { start: Instant::now(), timeout }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sleep for one poll interval, clipped to the time left.
    ///
    /// Returns `false` without sleeping once the deadline has passed, which is
    /// the caller's signal to stop polling.
    pub async fn pause(&self, interval: Duration) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return false;
        }
        tokio::time::sleep(interval.min(remaining)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_stops_at_deadline() {
        let deadline = Deadline::after(Duration::from_millis(30));
        let mut polls = 0;
        while deadline.pause(Duration::from_millis(10)).await {
            polls += 1;
            assert!(polls < 100, "pause never reported expiry");
        }
        assert!(deadline.expired());
        assert!(deadline.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_zero_timeout_never_sleeps() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(!deadline.pause(Duration::from_secs(5)).await);
    }
}
