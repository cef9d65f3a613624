//! Bounded retries for transient backend failures.
//!
//! [`Retrying`] wraps any [`ContainerDriver`] and retries calls that fail with
//! [`DriverError::Transient`], backing off exponentially between attempts. Once the
//! budget is spent the call fails with [`DriverError::BackendUnavailable`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{ContainerDriver, ContainerSpec, DriverError, DriverOp, Endpoints, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 100ms, 200ms, ... capped at 1s
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Retry `call` while it fails transiently.
    pub async fn run<T, F, Fut>(&self, operation: DriverOp, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match call().await {
                Err(err) if err.is_transient() => {
                    if attempt >= self.max_attempts {
                        warn!(
                            %operation,
                            attempts = attempt,
                            error = %err,
                            "Container backend still failing, giving up"
                        );
                        return Err(DriverError::BackendUnavailable {
                            operation,
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }

                    debug!(
                        %operation,
                        attempt,
                        ?backoff,
                        error = %err,
                        "Transient backend error, retrying"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Driver decorator applying a [`RetryPolicy`] to every call.
#[derive(Debug, Clone)]
pub struct Retrying<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D> Retrying<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<D: ContainerDriver> ContainerDriver for Retrying<D> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.policy
            .run(DriverOp::Create, || self.inner.create(spec))
            .await
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.policy
            .run(DriverOp::Start, || self.inner.start(container))
            .await
    }

    async fn pause(&self, container: &str) -> Result<()> {
        self.policy
            .run(DriverOp::Pause, || self.inner.pause(container))
            .await
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        self.policy
            .run(DriverOp::Unpause, || self.inner.unpause(container))
            .await
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.policy
            .run(DriverOp::Stop, || self.inner.stop(container))
            .await
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.policy
            .run(DriverOp::Remove, || self.inner.remove(container))
            .await
    }

    async fn endpoints(&self, container: &str) -> Result<Endpoints> {
        self.policy
            .run(DriverOp::Endpoints, || self.inner.endpoints(container))
            .await
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        self.policy
            .run(DriverOp::List, || self.inner.list_managed())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DriverError {
        DriverError::Transient {
            operation: DriverOp::Start,
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result = policy
            .run(DriverOp::Start, move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("started")
                }
            })
            .await;

        assert_eq!(result, Ok("started"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_is_backend_unavailable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run(DriverOp::Start, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        match result {
            Err(DriverError::BackendUnavailable {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, DriverOp::Start);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run(DriverOp::Endpoints, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DriverError::Endpoint("no published port".to_string()))
            })
            .await;

        assert_eq!(
            result,
            Err(DriverError::Endpoint("no published port".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_always_allows_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
