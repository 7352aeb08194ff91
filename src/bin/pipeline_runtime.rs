//! Pipeline Runtime - ingestor and aggregator in one process
//!
//! Both components get the same store and bus handles. With
//! `STORE_BACKEND=sqlite` or `memory` the bus is in-process and Redis is not
//! needed at all.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime -- --backend sqlite
//!
//! Environment variables: see `publisher` and `subscriber`.

use std::sync::Arc;
use std::time::Duration;
use wikiflow::aggregator_core::Aggregator;
use wikiflow::bucket::SystemClock;
use wikiflow::config::AppConfig;
use wikiflow::logging::init_logger;
use wikiflow::runtime::{log_config, Backends, BusMode};
use wikiflow::shutdown;
use wikiflow::streamer_core::{Ingestor, SseSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_logger(&config.rust_log);

    log::info!("🚀 Pipeline Runtime");
    log_config(&config);

    let backends = Backends::open(&config, BusMode::InProcess).await?;
    let (trigger, signal) = shutdown::channel();

    // Subscribe before the ingestor starts: the bus only delivers to
    // subscribers that are already connected.
    let subscription = backends.bus.subscribe(&config.channel).await?;
    let aggregator = Aggregator::new(backends.store.clone(), config.bucket_clock(), Arc::new(SystemClock));
    let aggregator_signal = signal.clone();
    let aggregator_bus = backends.bus.clone();
    let channel = config.channel.clone();
    let mut aggregator_handle = tokio::spawn(async move {
        aggregator
            .run_with_subscription(subscription, aggregator_bus, &channel, aggregator_signal)
            .await
    });
    log::info!("   ├─ ✅ Aggregator task spawned");

    let source = SseSource::new(config.stream_url.clone(), Duration::from_secs(10))?;
    let ingestor = Ingestor::new(
        Box::new(source),
        backends.bus.clone(),
        config.channel.clone(),
        config.reconnect,
        config.read_timeout,
    );
    let ingestor_handle = tokio::spawn(async move {
        ingestor.run(signal).await;
    });
    log::info!("   └─ ✅ Ingestor task spawned");

    log::info!("🔄 Press CTRL+C to shutdown gracefully");

    // an aggregator that stops on its own takes the ingestor down with it:
    // publishing with nobody counting is pointless
    let early_exit = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => log::info!("⚠️  Received CTRL+C, shutting down..."),
                Err(e) => log::error!("❌ Failed to listen for CTRL+C: {}", e),
            }
            None
        }
        result = &mut aggregator_handle => {
            log::error!("❌ Aggregator stopped unexpectedly, shutting down");
            Some(result)
        }
    };
    trigger.trigger();

    if let Err(e) = ingestor_handle.await {
        log::error!("❌ Ingestor task failed: {}", e);
    }

    let aggregator_result = match early_exit {
        Some(result) => result,
        None => aggregator_handle.await,
    };
    match aggregator_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log::error!("❌ Aggregator failed: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            log::error!("❌ Aggregator task failed: {}", e);
            return Err(e.into());
        }
    }

    log::info!("✅ Pipeline runtime stopped");
    Ok(())
}
