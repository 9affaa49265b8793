//! Resilient execution of retryable units of work.
//!
//! Every operation against the store runs through an [`ExecutionStrategy`]:
//! a generic resilience combinator that re-invokes a unit of work on
//! transient failure, with exponential backoff between attempts. The strategy
//! knows nothing about documents or queries; the unit must be safe to invoke
//! more than once with identical input, and no state from a failed attempt
//! may leak into the next one (each attempt receives a fresh clone of the
//! input and re-acquires any disposable resources itself).

use std::{future::Future, sync::Arc, sync::OnceLock, time::Duration};

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// Bounds and pacing for retrying transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay_before_attempt(&self, next_attempt: u32) -> Duration {
        // next_attempt is 2-based here; the first attempt has no delay.
        self.base_delay * 2u32.saturating_pow(next_attempt.saturating_sub(2))
    }
}

/// Applies a [`RetryPolicy`] to arbitrary units of work.
///
/// Holds no shared mutable state across invocations; each call is
/// independent. The lazily-built current-thread runtime only backs the
/// blocking adapters.
#[derive(Debug, Default)]
pub struct ExecutionStrategy {
    policy: RetryPolicy,
    runtime: OnceLock<Arc<Runtime>>,
}

impl ExecutionStrategy {
    /// Creates a strategy with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            runtime: OnceLock::new(),
        }
    }

    /// The configured retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `unit` with retry semantics.
    ///
    /// `unit` is invoked with a clone of `input` on every attempt. Transient
    /// failures are re-attempted up to the policy bound and then surfaced as
    /// [`StoreError::OperationFailed`]; all other failures propagate
    /// immediately. The cancellation token is observed before every attempt
    /// and while backing off; a canceled token fails with
    /// [`StoreError::Canceled`] without starting another attempt.
    pub async fn execute_async<I, R, F, Fut>(
        &self,
        operation: &'static str,
        input: I,
        unit: F,
        cancel: &CancellationToken,
    ) -> StoreResult<R>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = StoreResult<R>>,
    {
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Canceled);
            }

            match unit(input.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_before_attempt(attempt + 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off before retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StoreError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(StoreError::OperationFailed {
                        operation,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Blocking adapter: submits the async form and blocks until it resolves.
    ///
    /// Must not be called from inside an async runtime.
    pub fn execute<I, R, F, Fut>(
        &self,
        operation: &'static str,
        input: I,
        unit: F,
    ) -> StoreResult<R>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = StoreResult<R>>,
    {
        let runtime = self.runtime_handle()?;
        runtime.block_on(self.execute_async(operation, input, unit, &CancellationToken::new()))
    }

    /// Handle to the runtime backing the blocking adapters.
    pub(crate) fn runtime_handle(&self) -> StoreResult<Arc<Runtime>> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime.clone());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| StoreError::Internal(format!("failed to build runtime: {err}")))?;

        Ok(self
            .runtime
            .get_or_init(|| Arc::new(runtime))
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_strategy(max_attempts: u32) -> ExecutionStrategy {
        ExecutionStrategy::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let strategy = fast_strategy(3);
        let calls = AtomicU32::new(0);

        let result = strategy
            .execute_async(
                "test_op",
                7u32,
                |input| {
                    let calls = &calls;
                    async move {
                        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt < 3 {
                            Err(StoreError::Transient("connection reset".into()))
                        } else {
                            Ok(input * 2)
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result, 14);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_operation_failed() {
        let strategy = fast_strategy(3);
        let calls = AtomicU32::new(0);

        let err = strategy
            .execute_async(
                "test_op",
                (),
                |()| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StoreError::Transient("timeout".into()))
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            StoreError::OperationFailed {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "test_op");
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let strategy = fast_strategy(5);
        let calls = AtomicU32::new(0);

        let err = strategy
            .execute_async(
                "test_op",
                (),
                |()| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StoreError::QueryExecution("syntax error".into()))
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::QueryExecution(_)));
    }

    #[tokio::test]
    async fn canceled_token_prevents_first_attempt() {
        let strategy = fast_strategy(3);
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let err = strategy
            .execute_async(
                "test_op",
                (),
                |()| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                &token,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(err, StoreError::Canceled));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_retries() {
        let strategy = ExecutionStrategy::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        });
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let err = strategy
            .execute_async(
                "test_op",
                (),
                |()| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StoreError::Transient("timeout".into()))
                },
                &token,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::Canceled));
    }

    #[test]
    fn blocking_adapter_uses_single_code_path() {
        let strategy = fast_strategy(3);
        let calls = AtomicU32::new(0);

        let result = strategy
            .execute("test_op", 1u32, |input| {
                let calls = &calls;
                async move {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 2 {
                        Err(StoreError::Transient("reset".into()))
                    } else {
                        Ok(input + 1)
                    }
                }
            })
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
