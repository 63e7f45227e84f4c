use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF_SHIFT: u32 = 5;

/// Timeout and retry budget applied to every external model call.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallPolicy {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// `base * 2^(attempt - 1)`, capped at `base * 32`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

/// Runs `call` until it succeeds or the attempt budget is spent. A call exceeding
/// the policy timeout counts as `ModelError::Timeout` and is retried like any other failure.
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &CallPolicy,
    mut call: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = ModelError::Unknown(format!("{operation}: no attempt made"));

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = backoff_delay(policy.base_backoff, attempt);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "retrying model call"
            );
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => last_error = error,
        }
    }

    tracing::warn!(operation, kind = last_error.kind(), "model call exhausted retries");
    Err(last_error)
}
