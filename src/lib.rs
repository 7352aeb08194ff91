//! wikiflow: edit-rate histogram for a federated wiki network
//!
//! ```text
//! SSE recent-change feed → Ingestor → MessageBus (pub/sub)
//!     ↓
//! Aggregator → CounterStore (global:<b>, domain:<d>:<b>, known_domains)
//!     ↓
//! QueryService → visualization layer
//! ```

pub mod aggregator_core;
pub mod bucket;
pub mod config;
pub mod logging;
pub mod query;
pub mod runtime;
pub mod shutdown;
pub mod store;
pub mod streamer_core;
