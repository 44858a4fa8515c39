//! Rate limiting for contribution commands
//!
//! Each player gets a leaky bucket: `capacity` commands, draining back at
//! `capacity / window`.

use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::VoteTimings;
use crate::game::types::PlayerId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitViolation {
    #[error("Contribution rate exceeded, retry in {0:?}")]
    ContributionRateExceeded(Duration),
}

#[derive(Debug, Clone)]
struct Bucket {
    level: f64,
    last_leak: Instant,
}

/// Per-player contribution limits
pub struct ContributionRateLimiter {
    capacity: f64,
    leak_per_sec: f64,
    buckets: Mutex<HashMap<PlayerId, Bucket>>,
}

impl ContributionRateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let window = window.as_secs_f64().max(0.001);
        Self {
            capacity,
            leak_per_sec: capacity / window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_timings(timings: &VoteTimings) -> Self {
        Self::new(timings.bucket_capacity, timings.bucket_window)
    }

    /// Count one command for `player`
    pub fn check(&self, player: PlayerId) -> Result<(), RateLimitViolation> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(player).or_insert(Bucket {
            level: 0.0,
            last_leak: now,
        });

        let elapsed = now.duration_since(bucket.last_leak).as_secs_f64();
        bucket.level = (bucket.level - elapsed * self.leak_per_sec).max(0.0);
        bucket.last_leak = now;

        if bucket.level + 1.0 > self.capacity {
            let wait = (bucket.level + 1.0 - self.capacity) / self.leak_per_sec;
            return Err(RateLimitViolation::ContributionRateExceeded(
                Duration::from_secs_f64(wait),
            ));
        }

        bucket.level += 1.0;
        Ok(())
    }

    /// Drop buckets that have fully drained
    pub fn prune(&self) {
        let now = Instant::now();
        let leak = self.leak_per_sec;
        self.buckets.lock().retain(|_, bucket| {
            let elapsed = now.duration_since(bucket.last_leak).as_secs_f64();
            bucket.level - elapsed * leak > 0.0
        });
    }

    pub fn tracked_players(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let limiter = ContributionRateLimiter::new(8, Duration::from_secs(8));
        let player = Uuid::new_v4();

        for _ in 0..8 {
            assert!(limiter.check(player).is_ok());
        }
        assert!(matches!(
            limiter.check(player),
            Err(RateLimitViolation::ContributionRateExceeded(_))
        ));

        // Another player has their own bucket
        assert!(limiter.check(Uuid::new_v4()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_drains() {
        let limiter = ContributionRateLimiter::new(8, Duration::from_secs(8));
        let player = Uuid::new_v4();

        for _ in 0..8 {
            limiter.check(player).unwrap();
        }
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.check(player).is_ok());
        assert!(limiter.check(player).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_buckets() {
        let limiter = ContributionRateLimiter::new(8, Duration::from_secs(8));
        limiter.check(Uuid::new_v4()).unwrap();
        assert_eq!(limiter.tracked_players(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.prune();
        assert_eq!(limiter.tracked_players(), 0);
    }
}
