use crate::config::ReconnectPolicy;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: Option<u32>,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    /// `max_retries: None` retries forever.
    pub fn new(initial: Duration, max: Duration, max_retries: Option<u32>) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries,
            current_attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Result<Duration, MaxRetriesExceeded> {
        if let Some(max) = self.max_retries {
            if self.current_attempt >= max {
                return Err(MaxRetriesExceeded);
            }
        }

        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let delay = std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay);
        self.current_attempt = self.current_attempt.saturating_add(1);
        Ok(delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_delay()?;

        match self.max_retries {
            Some(max) => log::warn!(
                "⏳ Retry attempt {} of {} in {:?}",
                self.current_attempt,
                max,
                delay
            ),
            None => log::warn!("⏳ Retry attempt {} in {:?}", self.current_attempt, delay),
        }

        sleep(delay).await;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Delay source for the ingestor's reconnect loop. Never gives up.
#[derive(Debug)]
pub enum Reconnector {
    Immediate,
    Backoff(ExponentialBackoff),
}

impl Reconnector {
    pub fn from_policy(policy: ReconnectPolicy) -> Self {
        match policy {
            ReconnectPolicy::Immediate => Reconnector::Immediate,
            ReconnectPolicy::Backoff { initial, max } => {
                Reconnector::Backoff(ExponentialBackoff::new(initial, max, None))
            }
        }
    }

    /// `None` means reconnect right away.
    pub fn next_delay(&mut self) -> Option<Duration> {
        match self {
            Reconnector::Immediate => None,
            Reconnector::Backoff(backoff) => backoff.next_delay().ok(),
        }
    }

    pub fn reset(&mut self) {
        if let Reconnector::Backoff(backoff) = self {
            backoff.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), None);

        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().unwrap().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        backoff.reset();
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_bounded_backoff_gives_up() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(100), Some(2));

        assert!(backoff.next_delay().is_ok());
        assert!(backoff.next_delay().is_ok());
        assert!(backoff.next_delay().is_err());
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn test_unbounded_backoff_never_gives_up() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(8), None);
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_millis(8));
        }
    }

    #[test]
    fn test_immediate_reconnector() {
        let mut reconnector = Reconnector::from_policy(ReconnectPolicy::Immediate);
        assert_eq!(reconnector.next_delay(), None);
        assert_eq!(reconnector.next_delay(), None);
    }
}
