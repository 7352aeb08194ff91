//! Aggregator Core - bus subscriber that keeps the per-domain histogram
//!
//! ```text
//! MessageBus::subscribe → WikiEvent::decode → BucketClock::current_bucket
//!     ↓
//! CounterStore::increment_global_and_scoped + register_domain
//! ```

pub mod aggregator;

pub use aggregator::{Aggregator, AggregatorSnapshot, AggregatorStats, ConsumeEnd, MessageOutcome};
