//! Backoff timing control for retried HTTP calls.
use std::time::Duration;

/// Durations increase exponentially from `base_duration` until hitting `cap`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffStrategy {
    base_duration: Duration,
    cap: Duration,
    last_duration: Duration,
}

impl ExponentialBackoffStrategy {
    pub fn new(base_duration: Duration, cap: Duration) -> Self {
        Self {
            base_duration,
            cap,
            last_duration: Duration::from_secs(0),
        }
    }

    fn capped_next_duration(&self) -> Duration {
        let next_duration = if self.last_duration == Duration::from_secs(0) {
            self.base_duration
        } else {
            self.last_duration.checked_mul(2).unwrap_or(self.cap)
        };

        if next_duration > self.cap {
            self.cap
        } else {
            next_duration
        }
    }

    /// Gets how long to wait before retrying.
    pub fn next_duration(&mut self) -> Duration {
        let next_duration = self.capped_next_duration();
        self.last_duration = next_duration;
        next_duration
    }

    /// Waits the prescribed amount of time (as per `next_duration`).
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next_duration()).await
    }
}
