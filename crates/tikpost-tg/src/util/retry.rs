use crate::prelude::*;
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Upper bound (exclusive) of the random jitter added to each backoff delay
const MAX_JITTER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Total number of attempts including the first one
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt with the given zero-based index.
    /// The result lies in `[base * 2^attempt, base * 2^attempt + 2s)`.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..MAX_JITTER);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
    }
}

/// The reason why [`retry`] gave up
#[derive(Debug)]
pub(crate) enum RetryFailure {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last_error: Error },

    /// The error is not worth retrying, so it's returned as is
    NonRetryable { attempts: u32, error: Error },
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts of the `policy` run out. The closure receives the zero-based
/// index of the attempt.
pub(crate) async fn retry<T, Fut>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> Fut,
) -> Result<T, RetryFailure>
where
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let duration = policy.backoff(attempt);

            warn!(
                %attempt,
                duration = tracing_duration(duration),
                "Sleeping before the next attempt",
            );

            tokio::time::sleep(duration).await;
        }

        let err = match op(attempt).await {
            Ok(output) => {
                if attempt > 0 {
                    info!(%attempt, "Operation succeeded after a retry");
                }
                return Ok(output);
            }
            Err(err) => err,
        };

        let attempts = attempt + 1;

        if !err.is_retryable() {
            if attempt > 0 {
                warn!(%attempt, "Operation failed with a non-retryable error after a retry");
            }
            return Err(RetryFailure::NonRetryable {
                attempts,
                error: err,
            });
        }

        warn!(
            %attempts,
            %max_attempts,
            err = tracing_err(&err),
            "Attempt failed",
        );

        if attempts >= max_attempts {
            return Err(RetryFailure::Exhausted {
                attempts,
                last_error: err,
            });
        }

        attempt += 1;
    }
}
