//! In-process backend: counters in a mutex-guarded map, bus on
//! `tokio::sync::broadcast`
//!
//! Expiry is checked against the injected clock on every read, so tests can
//! move time forward without sleeping.

use super::{increment_keys, CounterStore, MessageBus, Scope, StoreError, Subscription};
use crate::bucket::{Bucket, BucketClock, Clock, SystemClock};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: i64,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, CounterEntry>,
    known_domains: HashSet<String>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    bucket_clock: BucketClock,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new(bucket_clock: BucketClock) -> Self {
        Self::with_clock(bucket_clock, Arc::new(SystemClock))
    }

    pub fn with_clock(bucket_clock: BucketClock, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bucket_clock,
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn bump(inner: &mut Inner, key: String, amount: u64, expires_at: i64, now: i64) {
        let entry = inner.counters.entry(key).or_insert(CounterEntry { count: 0, expires_at });
        if entry.expires_at <= now {
            entry.count = 0;
        }
        entry.count += amount;
        entry.expires_at = entry.expires_at.max(expires_at);
    }

    /// Number of live counter keys (expired ones are pruned first).
    pub fn live_keys(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner.counters.retain(|_, entry| entry.expires_at > now);
        Ok(inner.counters.len())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_global_and_scoped(
        &self,
        domain: &str,
        bucket: Bucket,
        amount: u64,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = self.bucket_clock.expires_at(bucket);
        let mut inner = self.lock()?;

        for key in increment_keys(domain, bucket) {
            Self::bump(&mut inner, key, amount, expires_at, now);
        }
        Ok(())
    }

    async fn register_domain(&self, domain: &str) -> Result<(), StoreError> {
        self.lock()?.known_domains.insert(domain.to_string());
        Ok(())
    }

    async fn read_counts(&self, scope: Scope<'_>, buckets: &[Bucket]) -> Result<Vec<u64>, StoreError> {
        let now = self.clock.now();
        let inner = self.lock()?;

        Ok(buckets
            .iter()
            .map(|bucket| match inner.counters.get(&scope.counter_key(*bucket)) {
                Some(entry) if entry.expires_at > now => entry.count,
                _ => 0,
            })
            .collect())
    }

    async fn list_known_domains(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock()?.known_domains.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl MessageBus for MemoryStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        match inner.channels.get(channel) {
            // a send error only means nobody is listening right now
            Some(tx) => Ok(tx.send(payload.to_string()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let rx = {
            let mut inner = self.lock()?;
            inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
                .subscribe()
        };

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("⚠️  Subscriber lagged, {} messages lost", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }

    fn bus_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::ManualClock;

    fn store_at(now: i64) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(now));
        let store = MemoryStore::with_clock(BucketClock::new(10, 40), clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_increment_and_read() {
        let (_clock, store) = store_at(5);

        store.increment_global_and_scoped("x", 0, 1).await.unwrap();
        store.increment_global_and_scoped("x", 0, 2).await.unwrap();
        store.increment_global_and_scoped("y", 0, 1).await.unwrap();

        assert_eq!(store.read_counts(Scope::Domain("x"), &[0, 10]).await.unwrap(), vec![3, 0]);
        assert_eq!(store.read_counts(Scope::Domain("y"), &[0]).await.unwrap(), vec![1]);
        assert_eq!(store.read_counts(Scope::Global, &[0]).await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_counters_expire_without_delete() {
        let (clock, store) = store_at(5);
        store.increment_global_and_scoped("x", 0, 1).await.unwrap();

        clock.set(49);
        assert_eq!(store.read_counts(Scope::Domain("x"), &[0]).await.unwrap(), vec![1]);

        clock.set(50);
        assert_eq!(store.read_counts(Scope::Domain("x"), &[0]).await.unwrap(), vec![0]);
        assert_eq!(store.read_counts(Scope::Global, &[0]).await.unwrap(), vec![0]);
        assert_eq!(store.live_keys().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_domain_is_idempotent() {
        let (_clock, store) = store_at(0);
        store.register_domain("en.wikipedia.org").await.unwrap();
        store.register_domain("en.wikipedia.org").await.unwrap();
        store.register_domain("pt.wikipedia.org").await.unwrap();

        assert_eq!(store.list_known_domains().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let (_clock, store) = store_at(0);
        store.set_available(false);

        let err = store.increment_global_and_scoped("x", 0, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_available(true);
        assert!(store.increment_global_and_scoped("x", 0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_bus_delivers_only_to_connected_subscribers() {
        let (_clock, store) = store_at(0);

        // nobody listening yet: dropped
        assert_eq!(store.publish("wiki", "early").await.unwrap(), 0);

        let mut sub = store.subscribe("wiki").await.unwrap();
        assert_eq!(store.publish("wiki", "hello").await.unwrap(), 1);
        assert_eq!(store.publish("other", "elsewhere").await.unwrap(), 0);

        assert_eq!(sub.next().await.as_deref(), Some("hello"));
    }
}
