//! Retry logic with configurable backoff policies for pipeline node execution.

use std::time::Duration;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Execute a handler with retry logic.
///
/// The closure `f` is called up to `max_retries + 1` times. Retries occur when:
/// - The outcome has status [`attractor_types::StageStatus::Retry`]
/// - The error satisfies [`attractor_types::AttractorError::is_retryable`]
///
/// Between retries, the function sleeps for the duration dictated by `policy`.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    node_id: &str,
) -> attractor_types::Result<attractor_types::Outcome>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = attractor_types::Result<attractor_types::Outcome>>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match f().await {
            Ok(outcome) => {
                if outcome.status == attractor_types::StageStatus::Retry && attempt < max_retries {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::info!(node = %node_id, attempt, delay_ms = %delay.as_millis(), "Retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(outcome);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                last_err = Some(e);
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(node = %node_id, attempt, delay_ms = %delay.as_millis(), "Retryable error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        attractor_types::AttractorError::RetriesExhausted {
            node: node_id.to_string(),
            attempts: max_retries + 1,
        }
    }))
}
