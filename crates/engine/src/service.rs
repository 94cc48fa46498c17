//! Delivery service — the outward-facing surface of the engine: the
//! rate-limited single-message entry point used by the campaign layer,
//! plus the administrative reads for dashboards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use courier_controls::ApiRateLimiter;
use courier_core::limits::{ApiRateLimit, FrequencyControl, ProviderRateLimit, RateLimitViolation};
use courier_core::message::{ChannelType, DeliveryAttempt};
use courier_core::CourierResult;
use courier_store::{AttemptLog, ChannelAttemptStats};

use crate::executor::{DeliveryExecutor, DeliveryOutcome, DeliveryReport};

/// Endpoint key under which campaign-layer sends are rate limited.
pub const SEND_ENDPOINT: &str = "/api/messages/send";

/// Outward-facing engine surface: per-caller API rate limiting in front
/// of the executor, and read-only views of stored state.
pub struct DeliveryService {
    executor: Arc<DeliveryExecutor>,
    attempts: Arc<AttemptLog>,
    api_limits: Arc<ApiRateLimiter>,
}

impl DeliveryService {
    pub fn new(
        executor: Arc<DeliveryExecutor>,
        attempts: Arc<AttemptLog>,
        api_limits: Arc<ApiRateLimiter>,
    ) -> Self {
        Self {
            executor,
            attempts,
            api_limits,
        }
    }

    /// Push one message through the pipeline on behalf of a caller.
    ///
    /// The caller's API budget is consumed first; a denial leaves the
    /// message untouched in the queue and reports the retry-after hint.
    pub async fn route_message(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        message_id: &Uuid,
    ) -> CourierResult<DeliveryOutcome> {
        let decision = self.api_limits.try_acquire(user_id, tenant_id, SEND_ENDPOINT);
        if !decision.allowed {
            let retry_after = decision.retry_after_secs.unwrap_or(0);
            warn!(
                user_id,
                message_id = %message_id,
                retry_after,
                "api rate limit denied send request"
            );
            return Ok(DeliveryOutcome {
                success: false,
                external_id: None,
                error: Some(format!(
                    "api rate limit exceeded, retry after {}s",
                    retry_after
                )),
                cost: None,
                attempt_number: 0,
            });
        }

        self.executor.route_message(message_id).await
    }

    /// Full attempt history for one message.
    pub fn attempt_history(&self, message_id: &Uuid) -> Vec<DeliveryAttempt> {
        self.executor.attempt_history(message_id)
    }

    /// Per-campaign delivery aggregates.
    pub fn delivery_report(&self, campaign_id: &Uuid) -> DeliveryReport {
        self.executor.delivery_report(campaign_id)
    }

    /// Per-channel attempt statistics since `since`.
    pub fn channel_stats(&self, channel: ChannelType, since: DateTime<Utc>) -> ChannelAttemptStats {
        self.attempts.channel_stats(channel, since)
    }

    /// The API rate-limit rule currently governing a caller, if any.
    pub fn api_limit_status(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Option<ApiRateLimit> {
        self.api_limits.status(user_id, tenant_id, SEND_ENDPOINT)
    }

    /// Recent API rate-limit violations, newest first.
    pub fn rate_limit_violations(&self, limit: usize) -> Vec<RateLimitViolation> {
        self.api_limits.violations(limit)
    }

    /// Frequency counters for one contact, if a record exists.
    pub fn frequency_status(&self, contact_id: Uuid, tenant_id: &str) -> Option<FrequencyControl> {
        self.executor.frequency_status(contact_id, tenant_id)
    }

    /// Provider limiter counters for one provider, if a record exists.
    pub fn provider_limit_status(
        &self,
        provider_name: &str,
        provider_type: &str,
    ) -> Option<ProviderRateLimit> {
        self.executor.provider_limit_status(provider_name, provider_type)
    }
}
