//! Subscriber - internal bus → time-bucketed counters
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin subscriber -- --backend redis
//! ```
//!
//! ## Environment Variables
//!
//! - REDIS_URL - Redis address (default: redis://127.0.0.1:6379)
//! - PUBSUB_CHANNEL - Channel name (default: wiki)
//! - STORE_BACKEND - redis | sqlite (default: redis); sqlite still subscribes via Redis
//! - SQLITE_PATH - Counter database for the sqlite backend (default: data/wikiflow.db)
//! - AGGREGATION_INTERVAL_SECS - Bucket width (default: 10)
//! - RETENTION_WINDOW_SECS - Retention window (default: 1800)
//! - RUST_LOG - Logging level (optional, default: info)

use std::sync::Arc;
use wikiflow::aggregator_core::Aggregator;
use wikiflow::bucket::SystemClock;
use wikiflow::config::AppConfig;
use wikiflow::logging::init_logger;
use wikiflow::runtime::{log_config, Backends, BusMode};
use wikiflow::shutdown;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_logger(&config.rust_log);

    log::info!("🚀 Starting subscriber");
    log_config(&config);

    let backends = Backends::open(&config, BusMode::Network).await?;
    let aggregator = Aggregator::new(backends.store, config.bucket_clock(), Arc::new(SystemClock));

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(shutdown::trigger_on_ctrl_c(trigger));

    aggregator.run(backends.bus, &config.channel, signal).await?;

    Ok(())
}
