//! Time buckets: fixed-width intervals identified by their start timestamp
//!
//! Everything here is pure except the `Clock` implementations, which only read
//! wall-clock time.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Start timestamp (unix seconds) of a fixed-width bucket.
pub type Bucket = i64;

/// `floor(now / interval) * interval`
pub fn current_bucket(now: i64, interval: i64) -> Bucket {
    now.div_euclid(interval) * interval
}

/// Buckets `b` with `current - retention <= b < current`, ascending.
pub fn window_buckets(now: i64, interval: i64, retention: i64) -> Vec<Bucket> {
    let current = current_bucket(now, interval);
    (current - retention..current)
        .step_by(interval as usize)
        .collect()
}

pub fn bucket_time(bucket: Bucket) -> DateTime<Utc> {
    Utc.timestamp_opt(bucket, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Interval and retention bound together, shared by the aggregator and the
/// query service so both agree on bucket boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketClock {
    interval: i64,
    retention: i64,
}

impl BucketClock {
    pub fn new(interval: i64, retention: i64) -> Self {
        Self { interval, retention }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn retention(&self) -> i64 {
        self.retention
    }

    pub fn current_bucket(&self, now: i64) -> Bucket {
        current_bucket(now, self.interval)
    }

    pub fn window_buckets(&self, now: i64) -> Vec<Bucket> {
        window_buckets(now, self.interval, self.retention)
    }

    /// Unix time at which a counter for `bucket` may be evicted: the moment
    /// the bucket falls out of every query window.
    pub fn expires_at(&self, bucket: Bucket) -> i64 {
        bucket + self.retention + self.interval
    }
}

pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock driven by hand, for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_bucket_bounds() {
        for interval in [1, 7, 10, 60] {
            for now in [0, 1, 9, 10, 11, 1_700_000_003, 1_700_000_009] {
                let b = current_bucket(now, interval);
                assert!(b <= now);
                assert!(now - b < interval);
                assert_eq!(b % interval, 0);
            }
        }
    }

    #[test]
    fn test_current_bucket_floors_negative_time() {
        assert_eq!(current_bucket(-1, 10), -10);
        assert_eq!(current_bucket(-10, 10), -10);
    }

    #[test]
    fn test_window_buckets_shape() {
        let buckets = window_buckets(1_700_000_007, 10, 1800);

        assert_eq!(buckets.len(), 180);
        assert!(buckets.windows(2).all(|w| w[1] - w[0] == 10));
        assert_eq!(buckets.first().copied(), Some(1_700_000_000 - 1800));
        assert_eq!(buckets.last().copied(), Some(1_700_000_000 - 10));
    }

    #[test]
    fn test_window_excludes_current_bucket() {
        let buckets = window_buckets(35, 10, 40);
        assert_eq!(buckets, vec![-10, 0, 10, 20]);
        assert!(!buckets.contains(&30));
    }

    #[test]
    fn test_expires_at_outlives_window() {
        let clock = BucketClock::new(10, 40);
        let b = 100;
        let expiry = clock.expires_at(b);

        // last instant at which a window still contains `b`
        let last_query = expiry - 1;
        assert!(clock.window_buckets(last_query).contains(&b));
        assert!(!clock.window_buckets(expiry).contains(&b));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_bucket_time() {
        assert_eq!(bucket_time(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
