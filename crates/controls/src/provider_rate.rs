//! Provider rate limiter — fixed-window throughput caps per upstream
//! vendor account, checked before any network call is made.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use courier_core::limits::{ProviderRateLimit, RateLimitDecision};

/// Default (max_requests, window_seconds) caps per provider type.
fn default_limits(provider_type: &str) -> (u32, u32) {
    match provider_type.to_ascii_lowercase().as_str() {
        "sms" => (100, 60),
        "email" => (1000, 60),
        "mms" => (50, 60),
        _ => (100, 60),
    }
}

/// Thread-safe provider limiter keyed by (provider name, provider type).
///
/// Records are created lazily with per-type defaults; check and increment
/// run under the per-key lock.
pub struct ProviderRateLimiter {
    limits: DashMap<(String, String), ProviderRateLimit>,
}

impl ProviderRateLimiter {
    pub fn new() -> Self {
        Self {
            limits: DashMap::new(),
        }
    }

    /// Check-and-consume one request slot for the provider.
    pub fn try_acquire(&self, provider_name: &str, provider_type: &str) -> RateLimitDecision {
        self.try_acquire_at(provider_name, provider_type, Utc::now())
    }

    pub fn try_acquire_at(
        &self,
        provider_name: &str,
        provider_type: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let key = (provider_name.to_string(), provider_type.to_string());
        let mut limit = self.limits.entry(key).or_insert_with(|| {
            let (max_requests, window_seconds) = default_limits(provider_type);
            ProviderRateLimit {
                provider_name: provider_name.to_string(),
                provider_type: provider_type.to_string(),
                max_requests,
                window_seconds,
                current_count: 0,
                window_started_at: now,
                active: true,
            }
        });

        if !limit.active {
            return RateLimitDecision::allow();
        }

        if (now - limit.window_started_at).num_seconds() >= limit.window_seconds as i64 {
            limit.current_count = 0;
            limit.window_started_at = now;
        }

        if limit.current_count >= limit.max_requests {
            let elapsed = (now - limit.window_started_at).num_seconds().max(0) as u32;
            let retry_after = limit.window_seconds.saturating_sub(elapsed);

            tracing::warn!(
                provider = provider_name,
                provider_type,
                count = limit.current_count,
                max = limit.max_requests,
                "provider rate limit exceeded"
            );

            return RateLimitDecision::deny(retry_after);
        }

        limit.current_count += 1;
        RateLimitDecision::allow()
    }

    /// Override the cap for one provider.
    pub fn set_limit(
        &self,
        provider_name: &str,
        provider_type: &str,
        max_requests: u32,
        window_seconds: u32,
    ) {
        let key = (provider_name.to_string(), provider_type.to_string());
        let now = Utc::now();
        self.limits.insert(
            key,
            ProviderRateLimit {
                provider_name: provider_name.to_string(),
                provider_type: provider_type.to_string(),
                max_requests,
                window_seconds,
                current_count: 0,
                window_started_at: now,
                active: true,
            },
        );
    }

    /// Snapshot of one provider's counters, for dashboards.
    pub fn status(&self, provider_name: &str, provider_type: &str) -> Option<ProviderRateLimit> {
        self.limits
            .get(&(provider_name.to_string(), provider_type.to_string()))
            .map(|l| l.clone())
    }
}

impl Default for ProviderRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
