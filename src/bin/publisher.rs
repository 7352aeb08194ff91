//! Publisher - recent-change stream → internal bus
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin publisher
//! ```
//!
//! ## Environment Variables
//!
//! - STREAM_URL - SSE endpoint (default: Wikimedia recentchange)
//! - REDIS_URL - Redis address (default: redis://127.0.0.1:6379)
//! - PUBSUB_CHANNEL - Channel name (default: wiki)
//! - STREAM_READ_TIMEOUT_SECS - Idle timeout before reconnecting (default: 60)
//! - RECONNECT_BACKOFF_MAX_SECS - Enable exponential reconnect backoff (default: unset, reconnect immediately)
//! - RUST_LOG - Logging level (optional, default: info)

use std::time::Duration;
use wikiflow::config::AppConfig;
use wikiflow::logging::init_logger;
use wikiflow::runtime::{log_config, open_bus};
use wikiflow::shutdown;
use wikiflow::streamer_core::{Ingestor, SseSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_logger(&config.rust_log);

    log::info!("🚀 Starting publisher");
    log_config(&config);

    let bus = open_bus(&config).await?;
    let source = SseSource::new(config.stream_url.clone(), Duration::from_secs(10))?;

    let ingestor = Ingestor::new(
        Box::new(source),
        bus,
        config.channel.clone(),
        config.reconnect,
        config.read_timeout,
    );

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(shutdown::trigger_on_ctrl_c(trigger));

    ingestor.run(signal).await;

    Ok(())
}
