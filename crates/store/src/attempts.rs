//! Delivery-attempt log — append-only audit trail keyed by message,
//! plus per-channel aggregate statistics for dashboards.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::message::{ChannelType, DeliveryAttempt};

/// Aggregate attempt statistics for one channel over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAttemptStats {
    pub channel: ChannelType,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_cost: f64,
    pub fallback_count: u64,
}

/// Append-only attempt log keyed by message id.
pub struct AttemptLog {
    attempts: DashMap<Uuid, Vec<DeliveryAttempt>>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self {
            attempts: DashMap::new(),
        }
    }

    /// Append one attempt row. Rows are never mutated afterwards.
    pub fn record(&self, attempt: DeliveryAttempt) {
        tracing::debug!(
            message_id = %attempt.message_id,
            attempt = attempt.attempt_number,
            success = attempt.success,
            provider = %attempt.provider_name,
            "delivery attempt logged"
        );
        self.attempts
            .entry(attempt.message_id)
            .or_default()
            .push(attempt);
    }

    /// All attempts for a message, ordered by attempt number.
    pub fn for_message(&self, message_id: &Uuid) -> Vec<DeliveryAttempt> {
        let mut rows = self
            .attempts
            .get(message_id)
            .map(|a| a.clone())
            .unwrap_or_default();
        rows.sort_by_key(|a| a.attempt_number);
        rows
    }

    /// Next 1-based attempt number for a message.
    pub fn next_attempt_number(&self, message_id: &Uuid) -> u32 {
        self.attempts
            .get(message_id)
            .map(|a| a.len() as u32)
            .unwrap_or(0)
            + 1
    }

    /// Aggregate statistics for one channel since `since`.
    pub fn channel_stats(&self, channel: ChannelType, since: DateTime<Utc>) -> ChannelAttemptStats {
        let mut total = 0u64;
        let mut successes = 0u64;
        let mut total_response_ms = 0u64;
        let mut total_cost = 0.0f64;
        let mut fallbacks = 0u64;

        for entry in self.attempts.iter() {
            for attempt in entry.value() {
                if attempt.channel != channel || attempt.attempted_at < since {
                    continue;
                }
                total += 1;
                if attempt.success {
                    successes += 1;
                }
                total_response_ms += attempt.response_time_ms;
                total_cost += attempt.cost.unwrap_or(0.0);
                if attempt.fallback_reason.is_some() {
                    fallbacks += 1;
                }
            }
        }

        ChannelAttemptStats {
            channel,
            total_attempts: total,
            successful_attempts: successes,
            failed_attempts: total - successes,
            success_rate: if total > 0 {
                successes as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_response_time_ms: if total > 0 {
                total_response_ms as f64 / total as f64
            } else {
                0.0
            },
            total_cost,
            fallback_count: fallbacks,
        }
    }
}

impl Default for AttemptLog {
    fn default() -> Self {
        Self::new()
    }
}
