//! Channel router — selects a provider for a message's channel and runs
//! fallback attempts when the primary fails.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{info, warn};

use courier_core::message::{ChannelType, FallbackReason, Message};
use courier_core::routing::{ChannelRoutingConfig, RoutingStrategy};
use courier_core::{CourierError, CourierResult};
use courier_controls::ProviderRateLimiter;
use courier_providers::{MessageContent, ProviderAdapter, ProviderRegistry, SendOutcome};
use courier_store::RoutingTable;

/// The provider picked for an attempt, plus the config that picked it.
pub struct ProviderSelection {
    pub provider: Arc<dyn ProviderAdapter>,
    pub config: ChannelRoutingConfig,
}

impl std::fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Result of a fallback attempt, logged by the executor as its own
/// delivery attempt.
pub struct FallbackOutcome {
    pub provider_name: String,
    pub outcome: SendOutcome,
    pub reason: FallbackReason,
    pub response_time_ms: u64,
}

/// Routes messages to providers according to the channel's active
/// routing config.
pub struct ChannelRouter {
    routing_table: Arc<RoutingTable>,
    registry: Arc<ProviderRegistry>,
    provider_limits: Arc<ProviderRateLimiter>,
    /// Rotating cursor per channel for round-robin selection.
    round_robin: DashMap<ChannelType, usize>,
}

impl ChannelRouter {
    pub fn new(
        routing_table: Arc<RoutingTable>,
        registry: Arc<ProviderRegistry>,
        provider_limits: Arc<ProviderRateLimiter>,
    ) -> Self {
        Self {
            routing_table,
            registry,
            provider_limits,
            round_robin: DashMap::new(),
        }
    }

    /// Pick the provider for a message per the channel's active config.
    ///
    /// Missing config or an unregistered provider name is a configuration
    /// error: the message fails immediately with a descriptive error.
    pub fn select_provider(&self, message: &Message) -> CourierResult<ProviderSelection> {
        let config = self
            .routing_table
            .active_config(message.channel)
            .ok_or_else(|| {
                CourierError::Config(format!(
                    "no active routing config for channel {}",
                    message.channel.as_str()
                ))
            })?;

        let provider_name = match config.routing_strategy {
            RoutingStrategy::PrimaryOnly => config.primary_provider.clone(),
            RoutingStrategy::RoundRobin => self.next_round_robin(&config),
            RoutingStrategy::CostOptimized => self.cheapest_within_threshold(&config, message)?,
        };

        let provider = self.registry.get(&provider_name).ok_or_else(|| {
            CourierError::Config(format!("provider {} is not registered", provider_name))
        })?;

        Ok(ProviderSelection { provider, config })
    }

    /// Attempt delivery through the fallback provider after a primary
    /// failure.
    ///
    /// Returns `None` when fallback does not apply: disabled, no fallback
    /// configured/registered, or the fallback provider is itself rate
    /// limited (the limiter is consulted before any network call).
    pub async fn try_fallback(
        &self,
        message: &Message,
        config: &ChannelRoutingConfig,
        primary_error: &str,
    ) -> Option<FallbackOutcome> {
        if !config.enable_fallback {
            return None;
        }
        let fallback_name = config.fallback_provider.as_deref()?;
        let provider = match self.registry.get(fallback_name) {
            Some(provider) => provider,
            None => {
                warn!(
                    message_id = %message.id,
                    provider = fallback_name,
                    "fallback provider not registered"
                );
                return None;
            }
        };

        let decision = self
            .provider_limits
            .try_acquire(fallback_name, message.channel.as_str());
        if !decision.allowed {
            warn!(
                message_id = %message.id,
                provider = fallback_name,
                "fallback provider rate limited, skipping fallback"
            );
            metrics::counter!("router.fallback_rate_limited").increment(1);
            return None;
        }

        let reason = Self::classify_fallback_reason(primary_error);
        info!(
            message_id = %message.id,
            provider = fallback_name,
            ?reason,
            "attempting fallback delivery"
        );
        metrics::counter!("router.fallback_attempts").increment(1);

        let content = MessageContent::from(message);
        let start = Instant::now();
        let outcome = match provider.send(&message.recipient, &content).await {
            Ok(outcome) => outcome,
            Err(e) => SendOutcome::failed(e.to_string()),
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        Some(FallbackOutcome {
            provider_name: fallback_name.to_string(),
            outcome,
            reason,
            response_time_ms,
        })
    }

    /// Look up a registered adapter by name.
    pub fn provider_by_name(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.registry.get(name)
    }

    /// Classify a primary failure into the reason recorded on the
    /// fallback attempt row.
    pub fn classify_fallback_reason(error: &str) -> FallbackReason {
        let lower = error.to_lowercase();
        if lower.contains("rate limit") || lower.contains("throttle") {
            FallbackReason::RateLimited
        } else if lower.contains("unavailable")
            || lower.contains("timeout")
            || lower.contains("connection")
        {
            FallbackReason::ProviderDown
        } else if lower.contains("cost") || lower.contains("quota") {
            FallbackReason::CostExceeded
        } else {
            FallbackReason::Manual
        }
    }

    /// Rotate across the configured providers (primary, then fallback).
    fn next_round_robin(&self, config: &ChannelRoutingConfig) -> String {
        let mut pool = vec![config.primary_provider.clone()];
        if let Some(fallback) = &config.fallback_provider {
            pool.push(fallback.clone());
        }

        let mut cursor = self.round_robin.entry(config.channel).or_insert(0);
        let picked = pool[*cursor % pool.len()].clone();
        *cursor += 1;
        picked
    }

    /// Primary unless its estimated cost exceeds the threshold and the
    /// fallback is cheaper.
    fn cheapest_within_threshold(
        &self,
        config: &ChannelRoutingConfig,
        message: &Message,
    ) -> CourierResult<String> {
        let primary = self.registry.get(&config.primary_provider).ok_or_else(|| {
            CourierError::Config(format!(
                "provider {} is not registered",
                config.primary_provider
            ))
        })?;

        let content = MessageContent::from(message);
        let primary_cost = primary.estimated_cost(&content);

        if let (Some(threshold), Some(fallback_name)) =
            (config.cost_threshold, &config.fallback_provider)
        {
            if primary_cost > threshold {
                if let Some(fallback) = self.registry.get(fallback_name) {
                    if fallback.estimated_cost(&content) < primary_cost {
                        info!(
                            message_id = %message.id,
                            primary_cost,
                            threshold,
                            provider = %fallback_name,
                            "cost threshold exceeded, preferring cheaper fallback"
                        );
                        metrics::counter!("router.cost_rerouted").increment(1);
                        return Ok(fallback_name.clone());
                    }
                }
            }
        }

        Ok(config.primary_provider.clone())
    }
}
