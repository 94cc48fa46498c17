//! Mock providers — simulate vendor latency, cost, and failures for
//! development and tests without touching real vendor accounts.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use courier_core::message::ChannelType;
use courier_core::CourierResult;

use crate::adapter::{DeliveryStatus, MessageContent, ProviderAdapter, SendOutcome};

/// SMS cost per 160-character segment.
const SMS_SEGMENT_COST: f64 = 0.0075;
/// Flat MMS cost per message.
const MMS_COST: f64 = 0.02;
/// Flat email cost per message.
const EMAIL_COST: f64 = 0.001;

/// Configurable mock adapter for any channel.
///
/// With no scripted outcomes queued, sends succeed with probability
/// `1.0 - failure_rate`; failures report a transient-style error. Tests
/// script exact outcomes with [`MockProvider::script_outcome`].
pub struct MockProvider {
    name: String,
    channel: ChannelType,
    latency: Duration,
    failure_rate: f64,
    scripted: Mutex<VecDeque<SendOutcome>>,
    scripted_status: Mutex<VecDeque<DeliveryStatus>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, channel: ChannelType) -> Self {
        let name = name.into();
        tracing::info!(provider = %name, channel = channel.as_str(), "mock provider initialized");
        Self {
            name,
            channel,
            latency: Duration::from_millis(100),
            failure_rate: 0.05,
            scripted: Mutex::new(VecDeque::new()),
            scripted_status: Mutex::new(VecDeque::new()),
        }
    }

    pub fn sms(name: impl Into<String>) -> Self {
        Self::new(name, ChannelType::Sms)
    }

    pub fn mms(name: impl Into<String>) -> Self {
        Self::new(name, ChannelType::Mms)
    }

    pub fn email(name: impl Into<String>) -> Self {
        let mut provider = Self::new(name, ChannelType::Email);
        provider.failure_rate = 0.03;
        provider
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue an exact outcome for the next send; scripted outcomes are
    /// consumed in FIFO order before any random simulation.
    pub fn script_outcome(&self, outcome: SendOutcome) {
        self.scripted.lock().push_back(outcome);
    }

    /// Queue an exact response for the next delivery-status poll.
    pub fn script_delivery_status(&self, status: DeliveryStatus) {
        self.scripted_status.lock().push_back(status);
    }

    fn external_id_prefix(&self) -> &'static str {
        match self.channel {
            ChannelType::Sms => "SMS",
            ChannelType::Mms => "MMS",
            ChannelType::Email => "EMAIL",
        }
    }

    fn cost_for(&self, content: &MessageContent) -> f64 {
        match self.channel {
            ChannelType::Sms => {
                let len = content.body.as_deref().map(str::len).unwrap_or(0).max(1);
                let segments = len.div_ceil(160) as f64;
                segments * SMS_SEGMENT_COST
            }
            ChannelType::Mms => MMS_COST,
            ChannelType::Email => EMAIL_COST,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> ChannelType {
        self.channel
    }

    fn estimated_cost(&self, content: &MessageContent) -> f64 {
        self.cost_for(content)
    }

    async fn send(&self, recipient: &str, content: &MessageContent) -> CourierResult<SendOutcome> {
        tokio::time::sleep(self.latency).await;

        if let Some(outcome) = self.scripted.lock().pop_front() {
            return Ok(outcome);
        }

        let success = rand::thread_rng().gen::<f64>() >= self.failure_rate;
        if success {
            let external_id = format!("{}_{}", self.external_id_prefix(), Uuid::new_v4().simple());
            let cost = self.cost_for(content);

            tracing::info!(
                provider = %self.name,
                recipient = %recipient,
                external_id = %external_id,
                cost,
                "mock send accepted"
            );
            metrics::counter!("provider.sends", "provider" => self.name.clone()).increment(1);

            Ok(SendOutcome::ok(external_id, cost))
        } else {
            tracing::warn!(provider = %self.name, recipient = %recipient, "mock send failed");
            metrics::counter!("provider.send_failures", "provider" => self.name.clone())
                .increment(1);

            Ok(SendOutcome::failed("simulated delivery failure: provider unavailable"))
        }
    }

    async fn delivery_status(&self, external_id: &str) -> CourierResult<DeliveryStatus> {
        tokio::time::sleep(Duration::from_millis(50)).await;

        if let Some(status) = self.scripted_status.lock().pop_front() {
            return Ok(status);
        }

        // 98% of accepted messages confirm as delivered.
        let delivered = rand::thread_rng().gen::<f64>() >= 0.02;
        tracing::debug!(
            provider = %self.name,
            external_id = %external_id,
            delivered,
            "mock delivery status"
        );

        Ok(if delivered {
            DeliveryStatus {
                delivered: true,
                error: None,
            }
        } else {
            DeliveryStatus {
                delivered: false,
                error: Some("message bounced".to_string()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> MessageContent {
        MessageContent {
            body: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_always_succeeds_at_zero_failure_rate() {
        let provider = MockProvider::sms("mock-sms")
            .with_failure_rate(0.0)
            .with_latency(Duration::from_millis(1));

        let outcome = provider.send("+15551234567", &body("hello")).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.external_id.unwrap().starts_with("SMS_"));
        assert_eq!(outcome.cost, Some(SMS_SEGMENT_COST));
    }

    #[tokio::test]
    async fn test_always_fails_at_full_failure_rate() {
        let provider = MockProvider::email("mock-email")
            .with_failure_rate(1.0)
            .with_latency(Duration::from_millis(1));

        let outcome = provider
            .send("user@example.com", &body("hello"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_scripted_outcomes_consumed_in_order() {
        let provider = MockProvider::sms("mock-sms")
            .with_failure_rate(0.0)
            .with_latency(Duration::from_millis(1));
        provider.script_outcome(SendOutcome::failed("invalid recipient").with_error_code("21211"));
        provider.script_outcome(SendOutcome::ok("SMS_scripted", 0.0075));

        let first = provider.send("+1555", &body("a")).await.unwrap();
        assert!(!first.success);
        assert_eq!(first.error_code.as_deref(), Some("21211"));

        let second = provider.send("+1555", &body("a")).await.unwrap();
        assert!(second.success);
        assert_eq!(second.external_id.as_deref(), Some("SMS_scripted"));

        // Queue drained, back to simulation.
        let third = provider.send("+1555", &body("a")).await.unwrap();
        assert!(third.success);
    }

    #[test]
    fn test_sms_cost_scales_with_segments() {
        let provider = MockProvider::sms("mock-sms");
        let one_segment = provider.estimated_cost(&body(&"a".repeat(160)));
        let two_segments = provider.estimated_cost(&body(&"a".repeat(161)));
        assert!((one_segment - SMS_SEGMENT_COST).abs() < f64::EPSILON);
        assert!((two_segments - 2.0 * SMS_SEGMENT_COST).abs() < f64::EPSILON);
    }

    #[test]
    fn test_flat_costs() {
        let mms = MockProvider::mms("mock-mms");
        let email = MockProvider::email("mock-email");
        assert!((mms.estimated_cost(&body("x")) - MMS_COST).abs() < f64::EPSILON);
        assert!((email.estimated_cost(&body("x")) - EMAIL_COST).abs() < f64::EPSILON);
    }
}
