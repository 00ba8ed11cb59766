use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, retrying retryable failures with
/// exponential backoff.
///
/// Each attempt is bounded by `policy.timeout_ms`; a timed out attempt counts
/// as retryable. Delays start at `base_delay_ms`, double after every failure
/// and are capped at `max_delay_ms`. `max_retries` bounds the number of
/// attempts, `0` meaning no bound. Non-retryable errors are returned at once.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    mut task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: FnMut() -> T,
    T: Future<Output = Result<P>>,
{
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut delay = Duration::from_millis(policy.base_delay_ms).min(max_delay);
    let mut attempts = 0;

    loop {
        let error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) => error,
            Err(_) => Error::RetryTimeout(timeout_duration),
        };

        if !error.is_retryable() {
            return Err(error);
        }

        attempts += 1;
        if policy.max_retries != 0 && attempts >= policy.max_retries {
            warn!("Task failed after {} attempts: {}", attempts, error);
            return Err(Error::RetryTaskFailed(format!(
                "Task failed after {attempts} attempts: {error}"
            )));
        }

        debug!(attempts, ?delay, "retryable failure: {}", error);
        sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}
