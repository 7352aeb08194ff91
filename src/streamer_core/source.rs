use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

/// Connection-level failures. All of them are transient: the ingestor logs,
/// counts and reconnects.
#[derive(Debug)]
pub enum IngestError {
    Connect(String),
    Stream(String),
    Timeout(Duration),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Connect(msg) => write!(f, "Connection error: {}", msg),
            IngestError::Stream(msg) => write!(f, "Stream error: {}", msg),
            IngestError::Timeout(after) => write!(f, "No data received for {:?}", after),
        }
    }
}

impl std::error::Error for IngestError {}

/// Raw text messages of one connection. Ends when the server closes it.
pub type MessageStream = BoxStream<'static, Result<String, IngestError>>;

/// A long-lived external event feed. Each `connect` opens a fresh connection;
/// dropping the returned stream closes it.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<MessageStream, IngestError>;

    fn describe(&self) -> String;
}
