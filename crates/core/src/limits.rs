//! Rate-limit record types: per-contact frequency counters and
//! fixed-window API/provider counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per (contact, tenant) frequency counters with day/week/month caps.
///
/// Counters roll over lazily: the limiter zeroes a counter when the
/// stored day/week/month of `last_sent_at` differs from the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyControl {
    pub contact_id: Uuid,
    pub tenant_id: String,
    pub max_per_day: u32,
    pub max_per_week: u32,
    pub max_per_month: u32,
    pub sent_today: u32,
    pub sent_this_week: u32,
    pub sent_this_month: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Sliding-window rule for API callers, scoped by user and/or tenant and
/// an endpoint pattern (`*` wildcard).
///
/// The window is a fixed-window counter reset at
/// `window_started_at + window_seconds`, not a true sliding log. The
/// coarse boundary behavior is intentional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRateLimit {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub endpoint_pattern: String,
    pub max_requests: u32,
    pub window_seconds: u32,
    pub current_count: u32,
    pub window_started_at: DateTime<Utc>,
    pub active: bool,
    pub priority: i32,
}

impl ApiRateLimit {
    pub fn new(endpoint_pattern: impl Into<String>, max_requests: u32, window_seconds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            tenant_id: None,
            endpoint_pattern: endpoint_pattern.into(),
            max_requests,
            window_seconds,
            current_count: 0,
            window_started_at: Utc::now(),
            active: true,
            priority: 0,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Fixed-window counter protecting an upstream vendor account, keyed by
/// provider identity rather than caller identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRateLimit {
    pub provider_name: String,
    pub provider_type: String,
    pub max_requests: u32,
    pub window_seconds: u32,
    pub current_count: u32,
    pub window_started_at: DateTime<Utc>,
    pub active: bool,
}

/// Outcome of a rate-limit check, with a retry-after hint on denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: Option<u32>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    pub fn deny(retry_after_secs: u32) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Audit row recorded whenever an API rate limit denies a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitViolation {
    pub id: Uuid,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub endpoint: String,
    pub matched_rule: String,
    pub request_count: u32,
    pub max_requests: u32,
    pub window_seconds: u32,
    pub retry_after_secs: u32,
    pub triggered_at: DateTime<Utc>,
}
