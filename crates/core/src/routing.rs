//! Channel routing configuration and failure classification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ChannelType;

/// How the router picks among configured providers for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Always the primary provider, never fall back.
    PrimaryOnly,
    /// Primary unless its estimated cost exceeds the cost threshold and a
    /// cheaper fallback exists.
    CostOptimized,
    /// Alternate across providers using a rotating cursor.
    RoundRobin,
}

/// Backoff shape for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Per-channel routing policy. One active config is selected per channel
/// by highest priority among active rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRoutingConfig {
    pub id: Uuid,
    pub channel: ChannelType,
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub routing_strategy: RoutingStrategy,
    pub enable_fallback: bool,
    pub max_retries: u32,
    pub retry_strategy: RetryStrategy,
    pub initial_retry_delay_secs: u32,
    pub max_retry_delay_secs: u32,
    pub cost_threshold: Option<f64>,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelRoutingConfig {
    pub fn new(channel: ChannelType, primary_provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            channel,
            primary_provider: primary_provider.into(),
            fallback_provider: None,
            routing_strategy: RoutingStrategy::PrimaryOnly,
            enable_fallback: false,
            max_retries: 3,
            retry_strategy: RetryStrategy::Exponential,
            initial_retry_delay_secs: 60,
            max_retry_delay_secs: 3600,
            cost_threshold: None,
            priority: 1,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_fallback(mut self, provider: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider.into());
        self.enable_fallback = true;
        self
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }

    pub fn with_retry(
        mut self,
        strategy: RetryStrategy,
        initial_delay_secs: u32,
        max_delay_secs: u32,
    ) -> Self {
        self.retry_strategy = strategy;
        self.initial_retry_delay_secs = initial_delay_secs;
        self.max_retry_delay_secs = max_delay_secs;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Classification of a delivery failure, driving retry and fallback
/// decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Suppression, frequency cap, or rate-limit denial. A gating
    /// decision, not a provider error.
    PolicyDenied,
    /// Timeout, 5xx, network failure. Retryable per policy.
    Transient,
    /// Invalid recipient, opt-out, hard bounce. Never retried.
    Permanent,
    /// Missing routing config or provider credentials. Fails the message
    /// immediately.
    Configuration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ChannelRoutingConfig::new(ChannelType::Sms, "mock-sms")
            .with_fallback("mock-sms-backup")
            .with_retry(RetryStrategy::Fixed, 30, 300)
            .with_priority(10);

        assert_eq!(config.primary_provider, "mock-sms");
        assert_eq!(config.fallback_provider.as_deref(), Some("mock-sms-backup"));
        assert!(config.enable_fallback);
        assert_eq!(config.retry_strategy, RetryStrategy::Fixed);
        assert_eq!(config.initial_retry_delay_secs, 30);
        assert_eq!(config.priority, 10);
        assert!(config.active);
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&RoutingStrategy::CostOptimized).unwrap();
        assert_eq!(json, "\"cost_optimized\"");
        let json = serde_json::to_string(&RetryStrategy::Exponential).unwrap();
        assert_eq!(json, "\"exponential\"");
    }
}
