//! Bounded retry for transient tracker failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use contentflow_shared::{Result, RetryConfig, Task, WorkflowState};

use crate::{IssueTracker, StatusFilter};

/// Upper bound for a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Fixed attempt count with exponential backoff.
///
/// Only errors whose `is_transient()` is true are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff multiplier per further retry.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after the `attempt`-th failed attempt (1-indexed):
    /// `base_delay * multiplier^(attempt - 1)`, capped at [`MAX_RETRY_DELAY`].
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.next_delay(attempt);
                    warn!(
                        op = name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient tracker failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

// ---------------------------------------------------------------------------
// Decorator
// ---------------------------------------------------------------------------

/// Wraps any tracker so every call goes through a [`RetryPolicy`].
pub struct RetryingTracker<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: IssueTracker> RetryingTracker<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: IssueTracker> IssueTracker for RetryingTracker<T> {
    async fn query_tasks(
        &self,
        created_after: DateTime<Utc>,
        status: StatusFilter,
    ) -> Result<Vec<Task>> {
        let inner = &self.inner;
        self.policy
            .run("query_tasks", move || inner.query_tasks(created_after, status))
            .await
    }

    async fn get_task_status(&self, key: &str) -> Result<WorkflowState> {
        let inner = &self.inner;
        self.policy
            .run("get_task_status", move || inner.get_task_status(key))
            .await
    }

    async fn transition_task(&self, key: &str, target: WorkflowState) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("transition_task", move || inner.transition_task(key, target))
            .await
    }

    async fn get_available_transitions(&self, key: &str) -> Result<Vec<WorkflowState>> {
        let inner = &self.inner;
        self.policy
            .run("get_available_transitions", move || {
                inner.get_available_transitions(key)
            })
            .await
    }
}
