//! Reload-and-retry for commands that lose an optimistic-lock race.

use crate::domain::WorkflowResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for optimistic-lock conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first. Default: 2
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff multiplier in milliseconds. Default: 25
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Runs `op` until it succeeds, fails with a non-conflict error, or the
    /// retries are used up. Each attempt must reload what it mutates.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> WorkflowResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WorkflowResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.code() == "optimistic_lock" && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(operation, attempt, error = %err, "conflict, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
