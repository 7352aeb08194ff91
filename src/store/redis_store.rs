//! Redis backend for both the counters and the internal bus
//!
//! Counters are plain integer keys bumped with `INCRBY` and given an absolute
//! `EXPIREAT` inside one `MULTI` pipeline, so concurrent aggregators never
//! need a lock of their own.

use super::{
    increment_keys, CounterStore, MessageBus, Scope, StoreError, Subscription, KNOWN_DOMAINS_KEY,
};
use crate::bucket::{Bucket, BucketClock};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use std::collections::HashSet;

/// Owns the Redis client and one multiplexed connection. Built once at startup
/// and handed to each component; cloning the connection is cheap.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    bucket_clock: BucketClock,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, bucket_clock: BucketClock) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        log::info!("🔗 Connected to Redis: {}", redis_url);

        Ok(Self {
            client,
            conn,
            bucket_clock,
        })
    }
}

/// `MULTI; INCRBY; EXPIREAT; ...; EXEC` for the global and the scoped key.
fn increment_pipeline(
    bucket_clock: &BucketClock,
    domain: &str,
    bucket: Bucket,
    amount: u64,
) -> redis::Pipeline {
    let expires_at = bucket_clock.expires_at(bucket);
    let keys = increment_keys(domain, bucket);

    let mut pipe = redis::pipe();
    pipe.atomic();
    for key in &keys {
        pipe.cmd("INCRBY").arg(key).arg(amount).ignore();
        pipe.cmd("EXPIREAT").arg(key).arg(expires_at).ignore();
    }
    pipe
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_global_and_scoped(
        &self,
        domain: &str,
        bucket: Bucket,
        amount: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = increment_pipeline(&self.bucket_clock, domain, bucket, amount)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn register_domain(&self, domain: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(KNOWN_DOMAINS_KEY)
            .arg(domain)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_counts(&self, scope: Scope<'_>, buckets: &[Bucket]) -> Result<Vec<u64>, StoreError> {
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = buckets.iter().map(|b| scope.counter_key(*b)).collect();
        let mut conn = self.conn.clone();
        let values: Vec<Option<u64>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        Ok(values.into_iter().map(|v| v.unwrap_or(0)).collect())
    }

    async fn list_known_domains(&self) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = redis::cmd("SMEMBERS")
            .arg(KNOWN_DOMAINS_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    fn backend_type(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl MessageBus for RedisStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        log::info!("📡 Subscribed to channel: {}", channel);

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        log::warn!("⚠️  Dropping non-text bus payload: {}", e);
                        None
                    }
                }
            });

        Ok(stream.boxed())
    }

    fn bus_type(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_commands(pipe: &redis::Pipeline) -> String {
        String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned()
    }

    #[test]
    fn test_increment_pipeline_layout() {
        let bucket_clock = BucketClock::new(10, 1800);
        let pipe = increment_pipeline(&bucket_clock, "en.wikipedia.org", 1000, 1);
        let packed = packed_commands(&pipe);

        assert!(packed.contains("MULTI"));
        assert!(packed.contains("EXEC"));
        assert_eq!(packed.matches("INCRBY").count(), 2);
        assert_eq!(packed.matches("EXPIREAT").count(), 2);
        assert!(packed.contains("global:1000"));
        assert!(packed.contains("domain:en.wikipedia.org:1000"));
        assert!(packed.contains(&bucket_clock.expires_at(1000).to_string()));
    }

    #[test]
    fn test_domain_named_global_keeps_its_own_key() {
        let bucket_clock = BucketClock::new(10, 1800);
        let pipe = increment_pipeline(&bucket_clock, "global", 1000, 3);
        let packed = packed_commands(&pipe);

        assert_eq!(packed.matches("INCRBY").count(), 2);
        assert!(packed.contains("domain:global:1000"));
    }
}
