//! Retry policy — failure classification and backoff computation.

use courier_core::message::Message;
use courier_core::routing::{ChannelRoutingConfig, FailureKind, RetryStrategy};

/// Error-text markers that identify a permanent rejection. Permanent
/// failures are never retried, regardless of remaining budget.
const PERMANENT_MARKERS: &[&str] = &[
    "invalid recipient",
    "invalid address",
    "invalid number",
    "unsubscribed",
    "opted out",
    "opt-out",
    "hard bounce",
    "blocked recipient",
];

/// Classify a provider error into a failure kind.
///
/// Unknown provider errors default to transient: the provider said no
/// without telling us why, and a retry is the cheaper mistake.
pub fn classify_failure(error: &str, error_code: Option<&str>) -> FailureKind {
    let lower = error.to_lowercase();

    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureKind::Permanent;
    }
    if lower.contains("rate limit") || lower.contains("throttle") {
        return FailureKind::PolicyDenied;
    }
    if lower.contains("no active routing config")
        || lower.contains("not registered")
        || lower.contains("missing credentials")
    {
        return FailureKind::Configuration;
    }
    // Provider reject codes in the 21xxx range are address-level rejections.
    if let Some(code) = error_code {
        if code.starts_with("21") {
            return FailureKind::Permanent;
        }
    }

    FailureKind::Transient
}

/// Decides whether a failed message gets another attempt and after what
/// delay.
pub struct RetryEvaluator;

impl RetryEvaluator {
    /// Returns `Some(delay_secs)` when the message should be retried.
    ///
    /// Permanent and configuration failures are rejected before the
    /// retry budget is even consulted.
    pub fn should_retry(
        message: &Message,
        failure: FailureKind,
        config: &ChannelRoutingConfig,
    ) -> Option<u32> {
        match failure {
            FailureKind::Permanent | FailureKind::Configuration => {
                tracing::info!(
                    message_id = %message.id,
                    ?failure,
                    "failure is not retryable"
                );
                return None;
            }
            FailureKind::Transient | FailureKind::PolicyDenied => {}
        }

        if message.retry_count >= message.max_retries {
            tracing::info!(
                message_id = %message.id,
                retry_count = message.retry_count,
                max_retries = message.max_retries,
                "retry budget exhausted"
            );
            return None;
        }

        let delay = Self::retry_delay(
            config.retry_strategy,
            message.retry_count + 1,
            config.initial_retry_delay_secs,
            config.max_retry_delay_secs,
        );

        tracing::info!(
            message_id = %message.id,
            next_attempt = message.retry_count + 2,
            delay_secs = delay,
            "retry scheduled"
        );

        Some(delay)
    }

    /// Delay after the `attempt_number`-th failed attempt (1-based),
    /// capped at `max_delay_secs`.
    pub fn retry_delay(
        strategy: RetryStrategy,
        attempt_number: u32,
        initial_delay_secs: u32,
        max_delay_secs: u32,
    ) -> u32 {
        let delay = match strategy {
            RetryStrategy::Fixed => initial_delay_secs,
            RetryStrategy::Linear => initial_delay_secs.saturating_mul(attempt_number),
            RetryStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt_number.saturating_sub(1));
                initial_delay_secs.saturating_mul(factor)
            }
        };
        delay.min(max_delay_secs)
    }
}
