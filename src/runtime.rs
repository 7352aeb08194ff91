//! Backend wiring for the binaries
//!
//! Handles are built once here and passed into each component; nothing is a
//! process-wide singleton.

use crate::config::{AppConfig, BackendType};
use crate::store::{CounterStore, MemoryStore, MessageBus, RedisStore, SqliteCounterStore, StoreError};
use std::sync::Arc;

/// Where the bus lives relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// Publisher and subscriber are separate processes: Redis pub/sub.
    Network,
    /// Publisher and subscriber share this process.
    InProcess,
}

pub struct Backends {
    pub store: Arc<dyn CounterStore>,
    pub bus: Arc<dyn MessageBus>,
}

impl Backends {
    pub async fn open(config: &AppConfig, bus_mode: BusMode) -> Result<Self, StoreError> {
        let bucket_clock = config.bucket_clock();

        let backends = match config.backend {
            BackendType::Redis => {
                let redis = Arc::new(RedisStore::connect(&config.redis_url, bucket_clock).await?);
                Backends {
                    store: redis.clone(),
                    bus: redis,
                }
            }
            BackendType::Sqlite => {
                let store = Arc::new(SqliteCounterStore::open(&config.sqlite_path, bucket_clock)?);
                let bus: Arc<dyn MessageBus> = match bus_mode {
                    BusMode::Network => Arc::new(RedisStore::connect(&config.redis_url, bucket_clock).await?),
                    BusMode::InProcess => Arc::new(MemoryStore::new(bucket_clock)),
                };
                Backends { store, bus }
            }
            BackendType::Memory => {
                if bus_mode == BusMode::Network {
                    return Err(process_local_bus());
                }
                let memory = Arc::new(MemoryStore::new(bucket_clock));
                Backends {
                    store: memory.clone(),
                    bus: memory,
                }
            }
        };

        log::info!(
            "📊 Backends: counters={}, bus={}",
            backends.store.backend_type(),
            backends.bus.bus_type()
        );
        Ok(backends)
    }
}

fn process_local_bus() -> StoreError {
    StoreError::Unsupported(
        "the memory bus is process-local; use pipeline_runtime or STORE_BACKEND=redis|sqlite".to_string(),
    )
}

/// Bus only, for the standalone publisher. Always Redis: an in-memory bus
/// would have no subscribers in another process.
pub async fn open_bus(config: &AppConfig) -> Result<Arc<dyn MessageBus>, StoreError> {
    match config.backend {
        BackendType::Memory => Err(process_local_bus()),
        BackendType::Redis | BackendType::Sqlite => Ok(Arc::new(
            RedisStore::connect(&config.redis_url, config.bucket_clock()).await?,
        )),
    }
}

/// Counter store only, for the read path.
pub async fn open_counter_store(config: &AppConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    let bucket_clock = config.bucket_clock();
    match config.backend {
        BackendType::Redis => Ok(Arc::new(RedisStore::connect(&config.redis_url, bucket_clock).await?)),
        BackendType::Sqlite => Ok(Arc::new(SqliteCounterStore::open(&config.sqlite_path, bucket_clock)?)),
        // a fresh in-memory store holds nothing another process counted
        BackendType::Memory => Err(StoreError::Unsupported(
            "the memory store is process-local; read from redis or sqlite".to_string(),
        )),
    }
}

pub fn log_config(config: &AppConfig) {
    log::info!("📊 Configuration:");
    log::info!("   ├─ Backend: {}", config.backend.as_str());
    log::info!("   ├─ Redis: {}", config.redis_url);
    log::info!("   ├─ Channel: {}", config.channel);
    log::info!("   ├─ Interval: {}s", config.interval_secs);
    log::info!("   └─ Retention: {}s", config.retention_secs);
}
