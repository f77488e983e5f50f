//! Bounded retry with exponential backoff around provider calls.

use std::future::Future;
use std::time::Duration;

use super::error::{ConnectorError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    /// Attempts ran out, or the error was not retryable.
    Exhausted { error: ConnectorError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } => Err(error),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Honours a provider `Retry-After` when it is within the cap.
    pub fn delay_for(&self, attempt: u32, error: &ConnectorError) -> Duration {
        error
            .retry_after()
            .map(|d| d.min(self.max_delay))
            .unwrap_or_else(|| self.backoff(attempt))
    }

    /// Wait before attempt `attempt + 1`, or `None` when `error` is final.
    pub fn next_delay(&self, attempt: u32, error: &ConnectorError) -> Option<Duration> {
        (error.is_transient() && attempt < self.max_attempts).then(|| self.delay_for(attempt, error))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    }
                }
                Err(error) => match self.next_delay(attempt, &error) {
                    Some(delay) => {
                        log::warn!(
                            "{} failed (attempt {}/{}): {}; retrying in {:?}",
                            operation,
                            attempt,
                            self.max_attempts,
                            error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return RetryOutcome::Exhausted {
                            error,
                            attempts: attempt,
                        }
                    }
                },
            }
        }
    }

    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(operation, op).await.into_result()
    }
}
