//! Stop signal shared by the long-running loops
//!
//! One `ShutdownTrigger` per process; every loop holds a `ShutdownSignal`
//! clone and checks it at its single suspension point.

use tokio::sync::watch;

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.tx.subscribe() }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the trigger is dropped.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Trigger shutdown on CTRL+C. Spawned once per binary.
pub async fn trigger_on_ctrl_c(trigger: ShutdownTrigger) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => log::error!("❌ Failed to listen for CTRL+C: {}", err),
    }
    trigger.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let (trigger, mut signal) = channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
            signal.is_triggered()
        });

        trigger.trigger();
        let triggered = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(triggered);
    }

    #[tokio::test]
    async fn test_wait_returns_when_trigger_dropped() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
