//! Delivery executor — runs one attempt for a message: policy gates,
//! provider selection, the send itself, fallback, and retry scheduling.
//! Every side effect is persisted before the executor returns, so a
//! crash mid-pipeline leaves the message resumable from stored state.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use courier_controls::{FrequencyLimiter, ProviderRateLimiter, SuppressionCheck};
use courier_core::message::{DeliveryAttempt, FallbackReason, Message, MessageStatus};
use courier_core::routing::FailureKind;
use courier_core::{CourierError, CourierResult};
use courier_providers::{MessageContent, SendOutcome};
use courier_routing::{classify_failure, ChannelRouter, RetryEvaluator};
use courier_store::{AttemptLog, MessageStore};

/// Result of pushing one message through the pipeline, returned to the
/// campaign layer.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub cost: Option<f64>,
    pub attempt_number: u32,
}

/// Per-campaign delivery aggregates for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub campaign_id: Uuid,
    pub total: usize,
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub delivered: usize,
    pub pending_retry: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_cost: f64,
}

/// Orchestrates one delivery attempt per invocation.
pub struct DeliveryExecutor {
    store: Arc<MessageStore>,
    attempts: Arc<AttemptLog>,
    router: Arc<ChannelRouter>,
    frequency: Arc<FrequencyLimiter>,
    provider_limits: Arc<ProviderRateLimiter>,
    suppression: Arc<dyn SuppressionCheck>,
    /// Attempts for one message are strictly sequential: a message id in
    /// this map has a worker on it, and other workers skip.
    in_flight: DashMap<Uuid, ()>,
}

impl DeliveryExecutor {
    pub fn new(
        store: Arc<MessageStore>,
        attempts: Arc<AttemptLog>,
        router: Arc<ChannelRouter>,
        frequency: Arc<FrequencyLimiter>,
        provider_limits: Arc<ProviderRateLimiter>,
        suppression: Arc<dyn SuppressionCheck>,
    ) -> Self {
        Self {
            store,
            attempts,
            router,
            frequency,
            provider_limits,
            suppression,
            in_flight: DashMap::new(),
        }
    }

    /// Push one message through the pipeline: the single entry point used
    /// by both the queue processor and the campaign layer.
    pub async fn route_message(&self, message_id: &Uuid) -> CourierResult<DeliveryOutcome> {
        if self.in_flight.insert(*message_id, ()).is_some() {
            return Ok(self.skipped(message_id, "attempt already in flight"));
        }

        let result = self.attempt_delivery(message_id).await;
        self.in_flight.remove(message_id);
        result
    }

    async fn attempt_delivery(&self, message_id: &Uuid) -> CourierResult<DeliveryOutcome> {
        // Cancellation and duplicate-claim check: only Queued/PendingRetry
        // messages move to Sending.
        let message = match self.store.claim_for_sending(message_id)? {
            Some(message) => message,
            None => return Ok(self.skipped(message_id, "message is not in a sendable state")),
        };

        let attempt_number = self.attempts.next_attempt_number(message_id);

        // Policy gates. These are compliance decisions, not provider
        // failures: no attempt row, no provider rate-limit slot.
        if self
            .suppression
            .is_suppressed(&message.contact_id, &message.recipient)
        {
            warn!(message_id = %message_id, "contact suppressed, skipping delivery");
            metrics::counter!("delivery.suppressed_skips").increment(1);
            return self.fail_terminal(
                message_id,
                "contact is suppressed, delivery skipped for compliance",
                attempt_number - 1,
            );
        }

        if !self
            .frequency
            .can_send(message.contact_id, &message.tenant_id)
        {
            warn!(message_id = %message_id, "frequency cap reached, skipping delivery");
            metrics::counter!("delivery.frequency_denied").increment(1);
            return self.fail_terminal(
                message_id,
                "contact frequency cap reached",
                attempt_number - 1,
            );
        }

        // Provider selection. A missing config or unknown provider fails
        // the message immediately with a descriptive error.
        let selection = match self.router.select_provider(&message) {
            Ok(selection) => selection,
            Err(e) => {
                error!(message_id = %message_id, error = %e, "routing configuration error");
                self.record_attempt(
                    &message,
                    attempt_number,
                    "unknown",
                    &SendOutcome::failed(e.to_string()).with_error_code("configuration"),
                    0,
                    None,
                );
                return self.fail_terminal(message_id, &e.to_string(), attempt_number);
            }
        };

        let provider_name = selection.provider.name().to_string();

        // Local throughput protection for the vendor account, consulted
        // before any network call.
        let decision = self
            .provider_limits
            .try_acquire(&provider_name, message.channel.as_str());

        let (outcome, response_time_ms, rate_limit_delay) = if decision.allowed {
            let content = MessageContent::from(&message);
            let start = Instant::now();
            let outcome = match selection.provider.send(&message.recipient, &content).await {
                Ok(outcome) => outcome,
                // Adapter faults (timeouts included) are contained here and
                // classified as transient failures.
                Err(e) => SendOutcome::failed(e.to_string()),
            };
            (outcome, start.elapsed().as_millis() as u64, None)
        } else {
            (
                SendOutcome::failed("provider rate limit exceeded"),
                0,
                decision.retry_after_secs,
            )
        };

        metrics::counter!("delivery.attempts", "channel" => message.channel.as_str())
            .increment(1);
        self.record_attempt(
            &message,
            attempt_number,
            &provider_name,
            &outcome,
            response_time_ms,
            None,
        );

        if outcome.success {
            return self.complete_sent(&message, attempt_number, &outcome, &provider_name);
        }

        let primary_error = outcome
            .error
            .clone()
            .unwrap_or_else(|| "unknown provider error".to_string());
        warn!(
            message_id = %message_id,
            provider = %provider_name,
            error = %primary_error,
            attempt = attempt_number,
            "delivery attempt failed"
        );

        // Fallback, when the config enables it. The fallback attempt gets
        // its own audit row with the classified reason.
        if let Some(fallback) = self
            .router
            .try_fallback(&message, &selection.config, &primary_error)
            .await
        {
            let fallback_attempt = attempt_number + 1;
            self.record_attempt(
                &message,
                fallback_attempt,
                &fallback.provider_name,
                &fallback.outcome,
                fallback.response_time_ms,
                Some(fallback.reason),
            );

            if fallback.outcome.success {
                metrics::counter!("delivery.fallback_recoveries").increment(1);
                return self.complete_sent(
                    &message,
                    fallback_attempt,
                    &fallback.outcome,
                    &fallback.provider_name,
                );
            }

            let fallback_error = fallback
                .outcome
                .error
                .unwrap_or_else(|| "unknown provider error".to_string());
            return self.schedule_retry_or_fail(
                &message,
                fallback_attempt,
                &fallback_error,
                fallback.outcome.error_code.as_deref(),
                &selection.config,
                rate_limit_delay,
            );
        }

        self.schedule_retry_or_fail(
            &message,
            attempt_number,
            &primary_error,
            outcome.error_code.as_deref(),
            &selection.config,
            rate_limit_delay,
        )
    }

    /// Poll the vendor for delivery confirmation and advance
    /// `Sent -> Delivered` (or `Failed` on a bounce).
    pub async fn refresh_delivery_status(&self, message_id: &Uuid) -> CourierResult<Message> {
        let message = self
            .store
            .get(message_id)
            .ok_or(CourierError::MessageNotFound(*message_id))?;

        if message.status != MessageStatus::Sent {
            return Ok(message);
        }
        let external_id = match &message.external_id {
            Some(id) => id.clone(),
            None => return Ok(message),
        };

        // The provider that accepted the message is on its last
        // successful attempt row.
        let provider_name = self
            .attempts
            .for_message(message_id)
            .iter()
            .rev()
            .find(|a| a.success)
            .map(|a| a.provider_name.clone())
            .ok_or_else(|| {
                CourierError::Storage(format!("no successful attempt recorded for {}", message_id))
            })?;

        let provider = self.router.provider_by_name(&provider_name).ok_or_else(|| {
            CourierError::Config(format!("provider {} is not registered", provider_name))
        })?;

        let status = provider.delivery_status(&external_id).await?;
        let updated = if status.delivered {
            self.store.update(message_id, |m| {
                m.status = MessageStatus::Delivered;
                m.delivered_at = Some(Utc::now());
            })?
        } else {
            let error = status.error.unwrap_or_else(|| "delivery failed".to_string());
            self.store.update(message_id, |m| {
                m.status = MessageStatus::Failed;
                m.failed_at = Some(Utc::now());
                m.error_message = Some(error.clone());
            })?
        };

        info!(
            message_id = %message_id,
            status = ?updated.status,
            "delivery status refreshed"
        );
        Ok(updated)
    }

    /// Administrative requeue of one failed message.
    pub fn retry_failed(&self, message_id: &Uuid) -> CourierResult<Message> {
        let message = self.store.requeue_failed(message_id)?;
        info!(
            message_id = %message_id,
            retry_count = message.retry_count,
            "failed message requeued"
        );
        Ok(message)
    }

    /// Requeue every failed message of a campaign that still has retry
    /// budget. Returns how many were requeued.
    pub fn retry_failed_for_campaign(&self, campaign_id: &Uuid) -> usize {
        let mut requeued = 0;
        for message in self.store.for_campaign(campaign_id) {
            if message.status == MessageStatus::Failed
                && message.retry_count < message.max_retries
                && self.store.requeue_failed(&message.id).is_ok()
            {
                requeued += 1;
            }
        }
        info!(campaign_id = %campaign_id, requeued, "campaign failed messages requeued");
        requeued
    }

    /// Cancel a queued or retry-pending message. The processor will not
    /// start new attempts for it.
    pub fn cancel(&self, message_id: &Uuid) -> CourierResult<Message> {
        let message = self
            .store
            .get(message_id)
            .ok_or(CourierError::MessageNotFound(*message_id))?;

        if !matches!(
            message.status,
            MessageStatus::Queued | MessageStatus::PendingRetry
        ) {
            return Err(CourierError::InvalidTransition(format!(
                "only queued or retry-pending messages can be cancelled, status is {:?}",
                message.status
            )));
        }

        let updated = self.store.update(message_id, |m| {
            m.status = MessageStatus::Cancelled;
            m.error_message = Some("cancelled by user".to_string());
        })?;
        info!(message_id = %message_id, "message cancelled");
        Ok(updated)
    }

    /// Attempt history for one message, for dashboards.
    pub fn attempt_history(&self, message_id: &Uuid) -> Vec<DeliveryAttempt> {
        self.attempts.for_message(message_id)
    }

    /// Frequency counters for one contact, if a record exists.
    pub fn frequency_status(
        &self,
        contact_id: Uuid,
        tenant_id: &str,
    ) -> Option<courier_core::limits::FrequencyControl> {
        self.frequency.status(contact_id, tenant_id)
    }

    /// Provider limiter counters for one provider, if a record exists.
    pub fn provider_limit_status(
        &self,
        provider_name: &str,
        provider_type: &str,
    ) -> Option<courier_core::limits::ProviderRateLimit> {
        self.provider_limits.status(provider_name, provider_type)
    }

    /// Per-campaign status/cost aggregates.
    pub fn delivery_report(&self, campaign_id: &Uuid) -> DeliveryReport {
        let messages = self.store.for_campaign(campaign_id);
        let mut report = DeliveryReport {
            campaign_id: *campaign_id,
            total: messages.len(),
            queued: 0,
            sending: 0,
            sent: 0,
            delivered: 0,
            pending_retry: 0,
            failed: 0,
            cancelled: 0,
            total_cost: 0.0,
        };

        for message in &messages {
            match message.status {
                MessageStatus::Queued => report.queued += 1,
                MessageStatus::Sending => report.sending += 1,
                MessageStatus::Sent => report.sent += 1,
                MessageStatus::Delivered => report.delivered += 1,
                MessageStatus::PendingRetry => report.pending_retry += 1,
                MessageStatus::Failed => report.failed += 1,
                MessageStatus::Cancelled => report.cancelled += 1,
            }
            report.total_cost += message.cost;
        }
        report
    }

    fn complete_sent(
        &self,
        message: &Message,
        attempt_number: u32,
        outcome: &SendOutcome,
        provider_name: &str,
    ) -> CourierResult<DeliveryOutcome> {
        self.store.update(&message.id, |m| {
            m.status = MessageStatus::Sent;
            m.sent_at = Some(Utc::now());
            m.external_id = outcome.external_id.clone();
            if let Some(cost) = outcome.cost {
                m.cost = cost;
            }
            m.error_message = None;
        })?;

        // Counted only now that a send actually went out.
        self.frequency
            .record_sent(message.contact_id, &message.tenant_id);

        info!(
            message_id = %message.id,
            provider = provider_name,
            external_id = outcome.external_id.as_deref().unwrap_or("-"),
            attempt = attempt_number,
            "message sent"
        );
        metrics::counter!("delivery.sent", "channel" => message.channel.as_str()).increment(1);

        Ok(DeliveryOutcome {
            success: true,
            external_id: outcome.external_id.clone(),
            error: None,
            cost: outcome.cost,
            attempt_number,
        })
    }

    fn schedule_retry_or_fail(
        &self,
        message: &Message,
        attempt_number: u32,
        last_error: &str,
        error_code: Option<&str>,
        config: &courier_core::routing::ChannelRoutingConfig,
        rate_limit_delay: Option<u32>,
    ) -> CourierResult<DeliveryOutcome> {
        let failure = if rate_limit_delay.is_some() {
            FailureKind::PolicyDenied
        } else {
            classify_failure(last_error, error_code)
        };

        if let Some(policy_delay) = RetryEvaluator::should_retry(message, failure, config) {
            // A limiter denial carries its own retry-after hint.
            let delay = rate_limit_delay.unwrap_or(policy_delay);
            self.store.update(&message.id, |m| {
                m.retry_count += 1;
                m.status = MessageStatus::PendingRetry;
                m.scheduled_at = Utc::now() + Duration::seconds(i64::from(delay));
                m.error_message = Some(last_error.to_string());
            })?;

            metrics::counter!("delivery.retries_scheduled").increment(1);
            return Ok(DeliveryOutcome {
                success: false,
                external_id: None,
                error: Some(last_error.to_string()),
                cost: None,
                attempt_number,
            });
        }

        metrics::counter!("delivery.failed", "channel" => message.channel.as_str()).increment(1);
        self.fail_terminal(&message.id, last_error, attempt_number)
    }

    fn fail_terminal(
        &self,
        message_id: &Uuid,
        error: &str,
        attempt_number: u32,
    ) -> CourierResult<DeliveryOutcome> {
        self.store.update(message_id, |m| {
            m.status = MessageStatus::Failed;
            m.failed_at = Some(Utc::now());
            m.error_message = Some(error.to_string());
        })?;

        Ok(DeliveryOutcome {
            success: false,
            external_id: None,
            error: Some(error.to_string()),
            cost: None,
            attempt_number,
        })
    }

    fn skipped(&self, message_id: &Uuid, reason: &str) -> DeliveryOutcome {
        DeliveryOutcome {
            success: false,
            external_id: None,
            error: Some(reason.to_string()),
            cost: None,
            attempt_number: self.attempts.next_attempt_number(message_id) - 1,
        }
    }

    fn record_attempt(
        &self,
        message: &Message,
        attempt_number: u32,
        provider_name: &str,
        outcome: &SendOutcome,
        response_time_ms: u64,
        fallback_reason: Option<FallbackReason>,
    ) {
        self.attempts.record(DeliveryAttempt {
            id: Uuid::new_v4(),
            message_id: message.id,
            attempt_number,
            channel: message.channel,
            provider_name: provider_name.to_string(),
            attempted_at: Utc::now(),
            success: outcome.success,
            external_id: outcome.external_id.clone(),
            error_message: outcome.error.clone(),
            error_code: outcome.error_code.clone(),
            cost: outcome.cost,
            response_time_ms,
            fallback_reason,
        });
        metrics::histogram!("delivery.response_time_ms").record(response_time_ms as f64);
    }
}
