//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wikiflow::streamer_core::{EventSource, IngestError, MessageStream};

pub type Connection = Result<Vec<Result<String, IngestError>>, IngestError>;

/// Event source that plays back one scripted outcome per `connect`. Once the
/// script runs out, every connection stays open and silent.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Connection>>,
    connects: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Connection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn connect(&self) -> Result<MessageStream, IngestError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(messages)) => Ok(stream::iter(messages).boxed()),
            Some(Err(e)) => Err(e),
            None => Ok(stream::pending::<Result<String, IngestError>>().boxed()),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub fn event(domain: &str) -> String {
    format!(
        r#"{{"meta":{{"domain":"{}","dt":"2024-01-01T00:00:00Z"}},"type":"edit","title":"Page"}}"#,
        domain
    )
}

pub fn ok(raw: String) -> Result<String, IngestError> {
    Ok(raw)
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 2s");
}
