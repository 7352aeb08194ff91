//! Counter store and internal bus
//!
//! Every component talks to shared state through the two traits here. The
//! store is the only owner of counter state; nothing keeps an in-process copy,
//! so any number of aggregator and query processes can share one backend.
//!
//! # Key layout
//!
//! ```text
//! global:<bucket>            integer count, expires at bucket + retention + interval
//! domain:<domain>:<bucket>   integer count, same expiry
//! known_domains              set of domain strings, no expiry
//! ```

pub mod memory_store;
pub mod redis_store;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use sqlite_store::SqliteCounterStore;

use crate::bucket::Bucket;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashSet;

pub const KNOWN_DOMAINS_KEY: &str = "known_domains";

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    /// The backend cannot serve this use, e.g. a process-local bus for a
    /// standalone publisher.
    Unsupported(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Unsupported(msg) => write!(f, "Unsupported backend: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Which counter series a read targets. A domain is always namespaced, so a
/// site that calls itself `global` still gets its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    Domain(&'a str),
}

impl Scope<'_> {
    pub fn counter_key(&self, bucket: Bucket) -> String {
        match self {
            Scope::Global => format!("global:{}", bucket),
            Scope::Domain(domain) => format!("domain:{}:{}", domain, bucket),
        }
    }
}

/// The two keys one event bumps: global first, then the domain's.
pub fn increment_keys(domain: &str, bucket: Bucket) -> [String; 2] {
    [Scope::Global.counter_key(bucket), Scope::Domain(domain).counter_key(bucket)]
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `amount` to both `global:<bucket>` and `domain:<domain>:<bucket>`,
    /// creating them on first use, and push their expiry to at least the end
    /// of the retention window.
    async fn increment_global_and_scoped(
        &self,
        domain: &str,
        bucket: Bucket,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// Idempotent add to the known-domain registry.
    async fn register_domain(&self, domain: &str) -> Result<(), StoreError>;

    /// Counts aligned with `buckets`; missing or expired buckets read as zero.
    async fn read_counts(&self, scope: Scope<'_>, buckets: &[Bucket]) -> Result<Vec<u64>, StoreError>;

    async fn list_known_domains(&self) -> Result<HashSet<String>, StoreError>;

    fn backend_type(&self) -> &'static str;
}

/// What a subscriber can expect from [`MessageBus::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// At-least-once to subscribers connected at publish time. Nothing is
    /// replayed for subscribers that were disconnected.
    ConnectedSubscribersOnly,
}

/// Stream of raw payloads; ends when the subscription is lost.
pub type Subscription = BoxStream<'static, String>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;

    fn delivery(&self) -> DeliveryGuarantee {
        DeliveryGuarantee::ConnectedSubscribersOnly
    }

    fn bus_type(&self) -> &'static str;
}
