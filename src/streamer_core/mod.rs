pub mod error_handler;
pub mod event;
pub mod ingestor;
pub mod source;
pub mod sse;

pub use event::{DecodeError, WikiEvent};
pub use ingestor::{IngestSnapshot, IngestState, IngestStats, Ingestor};
pub use source::{EventSource, IngestError, MessageStream};
pub use sse::{SseDecoder, SseSource};
