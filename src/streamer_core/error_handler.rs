use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Capped exponential backoff between reconnect attempts
///
/// `max_retries == 0` means retry forever.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: u64,
    max_delay: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, Error)]
#[error("Maximum retry attempts exceeded")]
pub struct MaxRetriesExceeded;

impl ExponentialBackoff {
    pub fn new(initial: u64, max: u64, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Delay in seconds for the next attempt, without advancing
    pub fn next_delay(&self) -> u64 {
        let factor = 2_u64.checked_pow(self.current_attempt).unwrap_or(u64::MAX);
        std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.max_retries > 0 && self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.next_delay();

        if self.max_retries > 0 {
            log::warn!(
                "⏳ Retry attempt {} of {} in {}s",
                self.current_attempt + 1,
                self.max_retries,
                delay
            );
        } else {
            log::warn!("⏳ Retry attempt {} in {}s", self.current_attempt + 1, delay);
        }

        sleep(Duration::from_secs(delay)).await;
        self.current_attempt = self.current_attempt.saturating_add(1);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}
