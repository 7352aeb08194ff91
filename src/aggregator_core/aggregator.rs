//! Aggregator: internal bus → time-bucketed counters
//!
//! Buckets by arrival time (the clock at processing time), not by any
//! timestamp inside the event. What is measured is the arrival rate.

use crate::bucket::{BucketClock, Clock};
use crate::shutdown::ShutdownSignal;
use crate::store::{CounterStore, MessageBus, StoreError, Subscription};
use crate::streamer_core::error_handler::ExponentialBackoff;
use crate::streamer_core::event::{preview, WikiEvent};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const THROUGHPUT_LOG_SECS: u64 = 10;
const STORE_RETRIES: u32 = 3;
const STORE_RETRY_INITIAL: Duration = Duration::from_millis(50);
const STORE_RETRY_MAX: Duration = Duration::from_millis(500);
const RESUBSCRIBE_INITIAL: Duration = Duration::from_millis(100);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Counted,
    Malformed,
    /// Store stayed unavailable through every retry; the message is lost.
    Dropped,
}

/// Why [`Aggregator::consume`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeEnd {
    Shutdown,
    /// The bus closed the subscription (e.g. the Redis connection dropped).
    SubscriptionLost,
}

#[derive(Debug, Default)]
pub struct AggregatorStats {
    processed: AtomicU64,
    malformed: AtomicU64,
    store_failures: AtomicU64,
    dropped: AtomicU64,
    resubscribes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregatorSnapshot {
    pub processed: u64,
    pub malformed: u64,
    pub store_failures: u64,
    pub dropped: u64,
    pub resubscribes: u64,
}

impl AggregatorStats {
    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            resubscribes: self.resubscribes.load(Ordering::Relaxed),
        }
    }
}

pub struct Aggregator {
    store: Arc<dyn CounterStore>,
    bucket_clock: BucketClock,
    clock: Arc<dyn Clock>,
    stats: Arc<AggregatorStats>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn CounterStore>, bucket_clock: BucketClock, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bucket_clock,
            clock,
            stats: Arc::new(AggregatorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<AggregatorStats> {
        self.stats.clone()
    }

    /// Subscribe, then count every message until shutdown. A lost
    /// subscription is re-established with backoff; only the stop signal or a
    /// failed first subscribe ends this.
    pub async fn run(
        &self,
        bus: Arc<dyn MessageBus>,
        channel: &str,
        shutdown: ShutdownSignal,
    ) -> Result<(), StoreError> {
        let subscription = bus.subscribe(channel).await?;
        self.run_with_subscription(subscription, bus, channel, shutdown).await
    }

    /// Like [`run`](Self::run), starting from a subscription the caller
    /// already holds so nothing published after it was opened is missed.
    pub async fn run_with_subscription(
        &self,
        subscription: Subscription,
        bus: Arc<dyn MessageBus>,
        channel: &str,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), StoreError> {
        log::info!("🚀 Starting aggregator");
        log::info!("   ├─ Channel: {} ({:?})", channel, bus.delivery());
        log::info!("   ├─ Store: {}", self.store.backend_type());
        log::info!(
            "   └─ Interval: {}s, retention: {}s",
            self.bucket_clock.interval(),
            self.bucket_clock.retention()
        );

        let mut subscription = subscription;
        let mut backoff = ExponentialBackoff::new(RESUBSCRIBE_INITIAL, RESUBSCRIBE_MAX, None);

        loop {
            if self.consume(subscription, shutdown.clone()).await == ConsumeEnd::Shutdown {
                return Ok(());
            }

            subscription = loop {
                let delay = backoff
                    .next_delay()
                    .map_err(|e| StoreError::Unavailable(format!("subscription to {} lost: {}", channel, e)))?;
                log::warn!("⏳ Re-subscribing to {} in {:?}", channel, delay);

                tokio::select! {
                    biased;
                    _ = shutdown.wait() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }

                match bus.subscribe(channel).await {
                    Ok(subscription) => {
                        self.stats.resubscribes.fetch_add(1, Ordering::Relaxed);
                        backoff.reset();
                        log::info!("✅ Re-subscribed to {}", channel);
                        break subscription;
                    }
                    Err(e) => log::error!("❌ Failed to re-subscribe to {}: {}", channel, e),
                }
            };
        }
    }

    pub async fn consume(&self, mut subscription: Subscription, mut shutdown: ShutdownSignal) -> ConsumeEnd {
        let mut window_count = 0u64;
        let mut last_log_time = Instant::now();

        let end = loop {
            let raw = tokio::select! {
                biased;
                _ = shutdown.wait() => break ConsumeEnd::Shutdown,
                next = subscription.next() => match next {
                    Some(raw) => raw,
                    None => {
                        log::warn!("⚠️  Subscription ended");
                        break ConsumeEnd::SubscriptionLost;
                    }
                },
            };

            if self.process_message(&raw).await == MessageOutcome::Counted {
                window_count += 1;
            }

            if last_log_time.elapsed().as_secs() >= THROUGHPUT_LOG_SECS {
                let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
                let snapshot = self.stats.snapshot();
                log::info!(
                    "📊 Aggregation rate: {:.1} events/sec (total: {}, malformed: {}, dropped: {})",
                    per_sec,
                    snapshot.processed,
                    snapshot.malformed,
                    snapshot.dropped
                );
                window_count = 0;
                last_log_time = Instant::now();
            }
        };

        if end == ConsumeEnd::Shutdown {
            let snapshot = self.stats.snapshot();
            log::info!(
                "✅ Aggregator stopped (processed: {}, malformed: {}, dropped: {})",
                snapshot.processed,
                snapshot.malformed,
                snapshot.dropped
            );
        }
        end
    }

    /// Decode, bucket by arrival time, bump global + domain counters and
    /// register the domain.
    pub async fn process_message(&self, raw: &str) -> MessageOutcome {
        let event = match WikiEvent::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!("Discarding message ({}): {}", e, preview(raw));
                return MessageOutcome::Malformed;
            }
        };

        let domain = event.domain();
        let bucket = self.bucket_clock.current_bucket(self.clock.now());

        let mut backoff = ExponentialBackoff::new(STORE_RETRY_INITIAL, STORE_RETRY_MAX, Some(STORE_RETRIES));
        while let Err(e) = self.store.increment_global_and_scoped(domain, bucket, 1).await {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            log::error!("❌ Failed to count event for {}: {}", domain, e);
            if backoff.sleep().await.is_err() {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("⚠️  Dropping event for {} after {} retries", domain, STORE_RETRIES);
                return MessageOutcome::Dropped;
            }
        }

        // the count already landed; a registry miss only delays the selector
        if let Err(e) = self.store.register_domain(domain).await {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("⚠️  Failed to register domain {}: {}", domain, e);
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        MessageOutcome::Counted
    }
}
