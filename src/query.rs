//! Read path for the visualization layer
//!
//! Pure reads: one `read_counts` per domain over the current retention
//! window, issued concurrently. Store failures go straight back to the
//! caller; there is nothing to retry within a single request.

use crate::bucket::{bucket_time, BucketClock};
use crate::store::{CounterStore, Scope, StoreError};
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatePoint {
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

pub type RateSeries = Vec<RatePoint>;

pub struct QueryService {
    store: Arc<dyn CounterStore>,
    bucket_clock: BucketClock,
}

impl QueryService {
    pub fn new(store: Arc<dyn CounterStore>, bucket_clock: BucketClock) -> Self {
        Self { store, bucket_clock }
    }

    /// Polling cadence for clients: one aggregation interval.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.bucket_clock.interval() as u64)
    }

    /// Windowed series per domain. Unknown or empty domains come back as an
    /// all-zero series.
    pub async fn event_rates(
        &self,
        domains: &[String],
        now: i64,
    ) -> Result<BTreeMap<String, RateSeries>, StoreError> {
        let buckets = self.bucket_clock.window_buckets(now);

        let reads = domains.iter().map(|domain| {
            let buckets = &buckets;
            async move {
                let counts = self.store.read_counts(Scope::Domain(domain.as_str()), buckets).await?;
                Ok::<_, StoreError>((domain.clone(), zip_series(buckets, &counts)))
            }
        });

        Ok(try_join_all(reads).await?.into_iter().collect())
    }

    /// Windowed series across every domain.
    pub async fn global_rates(&self, now: i64) -> Result<RateSeries, StoreError> {
        let buckets = self.bucket_clock.window_buckets(now);
        let counts = self.store.read_counts(Scope::Global, &buckets).await?;
        Ok(zip_series(&buckets, &counts))
    }

    /// Registry contents, sorted for display.
    pub async fn known_domains(&self) -> Result<Vec<String>, StoreError> {
        let mut domains: Vec<String> = self.store.list_known_domains().await?.into_iter().collect();
        domains.sort();
        Ok(domains)
    }
}

fn zip_series(buckets: &[i64], counts: &[u64]) -> RateSeries {
    buckets
        .iter()
        .enumerate()
        .map(|(i, bucket)| RatePoint {
            timestamp: bucket_time(*bucket),
            count: counts.get(i).copied().unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::ManualClock;
    use crate::store::MemoryStore;

    fn setup(now: i64) -> (Arc<MemoryStore>, QueryService) {
        let clock = Arc::new(ManualClock::new(now));
        let bucket_clock = BucketClock::new(10, 40);
        let store = Arc::new(MemoryStore::with_clock(bucket_clock, clock));
        let service = QueryService::new(store.clone(), bucket_clock);
        (store, service)
    }

    #[tokio::test]
    async fn test_event_rates_window() {
        let (store, service) = setup(45);
        store.increment_global_and_scoped("x", 10, 2).await.unwrap();
        store.increment_global_and_scoped("x", 30, 1).await.unwrap();
        store.increment_global_and_scoped("y", 30, 5).await.unwrap();

        let domains = vec!["x".to_string(), "y".to_string()];
        let rates = service.event_rates(&domains, 45).await.unwrap();

        let x: Vec<(i64, u64)> = rates["x"].iter().map(|p| (p.timestamp.timestamp(), p.count)).collect();
        assert_eq!(x, vec![(0, 0), (10, 2), (20, 0), (30, 1)]);
        assert_eq!(rates["y"].iter().map(|p| p.count).collect::<Vec<_>>(), vec![0, 0, 0, 5]);

        let global: Vec<u64> = service.global_rates(45).await.unwrap().iter().map(|p| p.count).collect();
        assert_eq!(global, vec![0, 2, 0, 6]);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_domains_are_zero() {
        let (_store, service) = setup(100);
        let domains = vec!["nowhere.example".to_string(), String::new()];

        let rates = service.event_rates(&domains, 100).await.unwrap();

        assert_eq!(rates.len(), 2);
        for series in rates.values() {
            assert_eq!(series.len(), 4);
            assert!(series.iter().all(|p| p.count == 0));
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (store, service) = setup(100);
        store.set_available(false);

        let result = service.event_rates(&["x".to_string()], 100).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_domain_named_global_is_not_the_global_series() {
        let (store, service) = setup(45);
        store.increment_global_and_scoped("en.wikipedia.org", 30, 5).await.unwrap();
        store.increment_global_and_scoped("global", 30, 1).await.unwrap();

        let rates = service.event_rates(&["global".to_string()], 45).await.unwrap();
        assert_eq!(rates["global"].iter().map(|p| p.count).collect::<Vec<_>>(), vec![0, 0, 0, 1]);

        let global: Vec<u64> = service.global_rates(45).await.unwrap().iter().map(|p| p.count).collect();
        assert_eq!(global, vec![0, 0, 0, 6]);
    }

    #[tokio::test]
    async fn test_known_domains_sorted() {
        let (store, service) = setup(0);
        store.register_domain("pt.wikipedia.org").await.unwrap();
        store.register_domain("en.wikipedia.org").await.unwrap();

        assert_eq!(
            service.known_domains().await.unwrap(),
            vec!["en.wikipedia.org".to_string(), "pt.wikipedia.org".to_string()]
        );
    }

    #[test]
    fn test_rate_point_serializes() {
        let point = RatePoint { timestamp: bucket_time(0), count: 3 };
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, r#"{"timestamp":"1970-01-01T00:00:00Z","count":3}"#);
    }
}
