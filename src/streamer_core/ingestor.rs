//! Stream ingestor: external event feed → internal bus
//!
//! ```text
//! Disconnected → Connecting → Streaming ─┐
//!      ↑                                 │ error / timeout / server close
//!      └─────────────────────────────────┘
//! ```
//!
//! Runs until the shutdown signal fires. Malformed messages are skipped
//! without touching the connection. The raw payload, not the decoded form,
//! is what gets republished.

use super::error_handler::Reconnector;
use super::event::{preview, WikiEvent};
use super::source::{EventSource, IngestError, MessageStream};
use crate::config::ReconnectPolicy;
use crate::shutdown::ShutdownSignal;
use crate::store::MessageBus;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const THROUGHPUT_LOG_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Disconnected,
    Connecting,
    Streaming,
}

impl IngestState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IngestState::Connecting,
            2 => IngestState::Streaming,
            _ => IngestState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            IngestState::Disconnected => 0,
            IngestState::Connecting => 1,
            IngestState::Streaming => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    state: AtomicU8,
    connections: AtomicU64,
    connection_errors: AtomicU64,
    published: AtomicU64,
    malformed: AtomicU64,
    publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSnapshot {
    pub connections: u64,
    pub connection_errors: u64,
    pub published: u64,
    pub malformed: u64,
    pub publish_failures: u64,
}

impl IngestStats {
    pub fn state(&self) -> IngestState {
        IngestState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: IngestState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

enum StreamEnd {
    Shutdown,
    Closed,
    Failed(IngestError),
}

pub struct Ingestor {
    source: Box<dyn EventSource>,
    bus: Arc<dyn MessageBus>,
    channel: String,
    reconnect: ReconnectPolicy,
    read_timeout: Duration,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    pub fn new(
        source: Box<dyn EventSource>,
        bus: Arc<dyn MessageBus>,
        channel: impl Into<String>,
        reconnect: ReconnectPolicy,
        read_timeout: Duration,
    ) -> Self {
        Self {
            source,
            bus,
            channel: channel.into(),
            reconnect,
            read_timeout,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Connect, stream, reconnect; returns only on shutdown.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        log::info!("🚀 Starting ingestor");
        log::info!("   ├─ Source: {}", self.source.describe());
        log::info!("   ├─ Channel: {}", self.channel);
        log::info!("   └─ Reconnect: {:?}", self.reconnect);

        let mut reconnector = Reconnector::from_policy(self.reconnect);

        while !shutdown.is_triggered() {
            self.stats.set_state(IngestState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                result = self.source.connect() => result,
            };

            let end = match connected {
                Ok(stream) => {
                    self.stats.connections.fetch_add(1, Ordering::Relaxed);
                    self.stats.set_state(IngestState::Streaming);
                    reconnector.reset();
                    log::info!("✅ Connected to {}", self.source.describe());
                    self.stream_messages(stream, &mut shutdown).await
                }
                Err(e) => StreamEnd::Failed(e),
            };

            self.stats.set_state(IngestState::Disconnected);

            match end {
                StreamEnd::Shutdown => break,
                StreamEnd::Closed => {
                    log::warn!("⚠️  Event stream closed by server, reconnecting");
                }
                StreamEnd::Failed(e) => {
                    let errors = self.stats.connection_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    log::warn!("❌ {} (connection errors so far: {})", e, errors);
                }
            }

            match reconnector.next_delay() {
                Some(delay) => {
                    log::info!("⏳ Reconnecting in {:?}", delay);
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                // immediate reconnect still gives other tasks a turn
                None => tokio::task::yield_now().await,
            }
        }

        self.stats.set_state(IngestState::Disconnected);
        let snapshot = self.stats.snapshot();
        log::info!(
            "✅ Ingestor stopped (published: {}, malformed: {}, connection errors: {})",
            snapshot.published,
            snapshot.malformed,
            snapshot.connection_errors
        );
    }

    async fn stream_messages(&self, mut stream: MessageStream, shutdown: &mut ShutdownSignal) -> StreamEnd {
        let mut window_count = 0u64;
        let mut last_log_time = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return StreamEnd::Shutdown,
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => return StreamEnd::Failed(IngestError::Timeout(self.read_timeout)),
                Ok(None) => return StreamEnd::Closed,
                Ok(Some(Err(e))) => return StreamEnd::Failed(e),
                Ok(Some(Ok(raw))) => {
                    // publishing is outside the select: a message that was
                    // read is always published before shutdown is honoured
                    if self.handle_message(&raw).await {
                        window_count += 1;
                    }
                }
            }

            if last_log_time.elapsed().as_secs() >= THROUGHPUT_LOG_SECS {
                let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
                let snapshot = self.stats.snapshot();
                log::info!(
                    "📊 Ingest rate: {:.1} events/sec (published: {}, malformed: {}, publish failures: {})",
                    per_sec,
                    snapshot.published,
                    snapshot.malformed,
                    snapshot.publish_failures
                );
                window_count = 0;
                last_log_time = Instant::now();
            }
        }
    }

    /// Returns true when the message was published.
    async fn handle_message(&self, raw: &str) -> bool {
        if let Err(e) = WikiEvent::decode(raw) {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            log::debug!("Skipping message ({}): {}", e, preview(raw));
            return false;
        }

        match self.bus.publish(&self.channel, raw).await {
            Ok(receivers) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                log::trace!("Published to {} subscriber(s)", receivers);
                true
            }
            Err(e) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("❌ Failed to publish event: {}", e);
                false
            }
        }
    }
}
