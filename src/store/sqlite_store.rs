//! SQLite counter backend for single-node runs
//!
//! Each counter is one row; increments are a single UPSERT inside a
//! transaction so both keys move together. Expired rows read as zero and are
//! pruned every `PRUNE_EVERY` increments.

use super::{increment_keys, CounterStore, Scope, StoreError};
use crate::bucket::{Bucket, BucketClock, Clock, SystemClock};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const PRUNE_EVERY: u64 = 1_000;

pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
    bucket_clock: BucketClock,
    clock: Arc<dyn Clock>,
    increments: AtomicU64,
}

impl SqliteCounterStore {
    pub fn open(db_path: impl AsRef<Path>, bucket_clock: BucketClock) -> Result<Self, StoreError> {
        Self::open_with_clock(db_path, bucket_clock, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        db_path: impl AsRef<Path>,
        bucket_clock: BucketClock,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_counters_expires_at ON counters(expires_at);
            CREATE TABLE IF NOT EXISTS known_domains (
                domain TEXT PRIMARY KEY
            );",
        )?;

        log::info!("✅ SQLite counter store ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Mutex::new(conn),
            bucket_clock,
            clock,
            increments: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    /// Delete rows whose expiry has passed. Returns the number removed.
    pub fn prune_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM counters WHERE expires_at <= ?1", params![now])?;
        if removed > 0 {
            log::debug!("🧹 Pruned {} expired counters", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment_global_and_scoped(
        &self,
        domain: &str,
        bucket: Bucket,
        amount: u64,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = self.bucket_clock.expires_at(bucket);
        let keys = increment_keys(domain, bucket);

        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for key in &keys {
                // a row left behind after expiry restarts from zero
                tx.execute(
                    "INSERT INTO counters (key, count, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        count = CASE WHEN counters.expires_at <= ?4
                                     THEN excluded.count
                                     ELSE counters.count + excluded.count END,
                        expires_at = MAX(counters.expires_at, excluded.expires_at)",
                    params![key, amount as i64, expires_at, now],
                )?;
            }
            tx.commit()?;
        }

        if self.increments.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune_expired()?;
        }

        Ok(())
    }

    async fn register_domain(&self, domain: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO known_domains (domain) VALUES (?1)",
            params![domain],
        )?;
        Ok(())
    }

    async fn read_counts(&self, scope: Scope<'_>, buckets: &[Bucket]) -> Result<Vec<u64>, StoreError> {
        let now = self.clock.now();
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT count FROM counters WHERE key = ?1 AND expires_at > ?2")?;

        let mut counts = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let count: Option<i64> = stmt
                .query_row(params![scope.counter_key(*bucket), now], |row| row.get(0))
                .optional()?;
            counts.push(count.unwrap_or(0).max(0) as u64);
        }
        Ok(counts)
    }

    async fn list_known_domains(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT domain FROM known_domains")?;
        let domains = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(domains)
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
