//! Bounded retry for queue publishing
//!
//! A send counts as delivered only once the queue confirms a message id.
//! Attempts back off exponentially up to a cap; the whole loop is bounded by
//! both an attempt count and a deadline.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wastetrack_domain::repository::MessageQueue;
use wastetrack_types::{Error, QueueMessage, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upper bound on the time spent delivering one message
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_deadline_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, for tests and in-process queues
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            deadline_ms: u64::MAX,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry policy needs at least one attempt".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::InvalidInput(format!(
                "initial backoff {}ms exceeds the cap {}ms",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`, counting from 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// A confirmed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub attempts: u32,
}

/// Send `message` until the queue confirms it or the policy is exhausted
pub fn publish_with_retry(
    queue: &dyn MessageQueue,
    message: &QueueMessage,
    policy: &RetryPolicy,
) -> Result<Delivery> {
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last_error = match queue.send(message) {
            Ok(Some(message_id)) => {
                debug!(%message_id, attempt, "message confirmed");
                return Ok(Delivery {
                    message_id,
                    attempts: attempt,
                });
            }
            Ok(None) => "send was not confirmed with a message id".to_string(),
            Err(e) => e.to_string(),
        };

        let delay = policy.backoff(attempt);
        let out_of_time = started.elapsed().saturating_add(delay) > policy.deadline();
        if attempt >= policy.max_attempts || out_of_time {
            return Err(Error::DeliveryFailed {
                attempts: attempt,
                last_error,
            });
        }
        warn!(attempt, error = %last_error, delay_ms = delay.as_millis() as u64, "publish failed, retrying");
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}
