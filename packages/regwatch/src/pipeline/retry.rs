//! Stage retries with exponential backoff.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::pipeline::config::RetryPolicy;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts run out. Returns the outcome and the attempts used.
///
/// `op` receives the 1-based attempt number. Cancellation interrupts both the
/// operation and the backoff sleep.
pub(crate) async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    stage: &'static str,
    cancel: &CancellationToken,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = op(attempt) => result,
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    stage,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Stage failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (Err(PipelineError::Cancelled), attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> PipelineError {
        PipelineError::ExtractionUnavailable {
            reason: "busy".into(),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let (result, attempts) = retry(&RetryPolicy::immediate(3), "test", &CancellationToken::new(), move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) = retry(&RetryPolicy::immediate(2), "test", &CancellationToken::new(), |_| async {
            Err::<(), _>(transient())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let (result, attempts) = retry(&RetryPolicy::immediate(5), "test", &CancellationToken::new(), |_| async {
            Err::<(), _>(PipelineError::Persistence(PersistenceError::Conflict {
                source_id: uuid::Uuid::nil(),
                expected: None,
                actual: None,
            }))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), "persistence");
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (result, _) = retry(&RetryPolicy::immediate(3), "test", &cancel, |_| async { Ok(1) }).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
