//! API rate limiter — fixed-window counters keyed by the most specific
//! matching rule (user / tenant / endpoint pattern).
//!
//! The window is a counter reset at `window_started_at + window_seconds`,
//! not a sliding log; it under-protects at window boundaries and callers
//! depend on that exact behavior.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use courier_core::limits::{ApiRateLimit, RateLimitDecision, RateLimitViolation};

/// Thread-safe API rate limiter.
///
/// `try_acquire` performs the check and the increment under the matched
/// rule's per-key lock: of two concurrent callers racing for the last
/// slot in a window, exactly one is admitted.
pub struct ApiRateLimiter {
    rules: DashMap<Uuid, ApiRateLimit>,
    violations: Mutex<Vec<RateLimitViolation>>,
}

impl ApiRateLimiter {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn add_rule(&self, rule: ApiRateLimit) -> Uuid {
        let id = rule.id;
        tracing::info!(
            pattern = %rule.endpoint_pattern,
            max = rule.max_requests,
            window_secs = rule.window_seconds,
            user = rule.user_id.as_deref().unwrap_or("-"),
            tenant = rule.tenant_id.as_deref().unwrap_or("-"),
            "api rate limit rule added"
        );
        self.rules.insert(id, rule);
        id
    }

    pub fn remove_rule(&self, id: &Uuid) -> bool {
        self.rules.remove(id).is_some()
    }

    pub fn rules(&self) -> Vec<ApiRateLimit> {
        self.rules.iter().map(|r| r.clone()).collect()
    }

    /// Check-and-consume one request slot for the caller.
    pub fn try_acquire(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        endpoint: &str,
    ) -> RateLimitDecision {
        self.try_acquire_at(user_id, tenant_id, endpoint, Utc::now())
    }

    pub fn try_acquire_at(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let rule_id = match self.best_matching_rule(user_id, tenant_id, endpoint) {
            Some(id) => id,
            // No rule configured for this endpoint: unlimited.
            None => return RateLimitDecision::allow(),
        };

        // Re-acquire mutably and do the window reset + check + increment
        // while holding the per-key lock.
        let mut rule = match self.rules.get_mut(&rule_id) {
            Some(rule) => rule,
            None => return RateLimitDecision::allow(),
        };

        if elapsed_secs(rule.window_started_at, now) >= rule.window_seconds as i64 {
            rule.current_count = 0;
            rule.window_started_at = now;
        }

        if rule.current_count >= rule.max_requests {
            let retry_after = rule
                .window_seconds
                .saturating_sub(elapsed_secs(rule.window_started_at, now).max(0) as u32);

            tracing::warn!(
                user_id,
                endpoint,
                count = rule.current_count,
                max = rule.max_requests,
                retry_after,
                "api rate limit exceeded"
            );

            self.violations.lock().push(RateLimitViolation {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                tenant_id: tenant_id.map(str::to_string),
                endpoint: endpoint.to_string(),
                matched_rule: rule.endpoint_pattern.clone(),
                request_count: rule.current_count,
                max_requests: rule.max_requests,
                window_seconds: rule.window_seconds,
                retry_after_secs: retry_after,
                triggered_at: now,
            });

            return RateLimitDecision::deny(retry_after);
        }

        rule.current_count += 1;
        RateLimitDecision::allow()
    }

    /// Snapshot of the rule that would govern this caller, for dashboards.
    pub fn status(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        endpoint: &str,
    ) -> Option<ApiRateLimit> {
        self.best_matching_rule(user_id, tenant_id, endpoint)
            .and_then(|id| self.rules.get(&id).map(|r| r.clone()))
    }

    /// Most recent violation rows, newest first.
    pub fn violations(&self, limit: usize) -> Vec<RateLimitViolation> {
        let violations = self.violations.lock();
        violations.iter().rev().take(limit).cloned().collect()
    }

    /// Pick the most specific active rule matching the caller: priority
    /// descending, then user-scoped over tenant-scoped over global.
    fn best_matching_rule(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        endpoint: &str,
    ) -> Option<Uuid> {
        let mut candidates: Vec<(Uuid, i32, u8)> = Vec::new();

        for entry in self.rules.iter() {
            let rule = entry.value();
            if !rule.active || !wildcard_match(&rule.endpoint_pattern, endpoint) {
                continue;
            }

            let specificity = match (&rule.user_id, &rule.tenant_id) {
                (Some(rule_user), _) if rule_user == user_id => 2,
                (Some(_), _) => continue,
                (None, Some(rule_tenant)) if Some(rule_tenant.as_str()) == tenant_id => 1,
                (None, Some(_)) => continue,
                (None, None) => 0,
            };

            candidates.push((rule.id, rule.priority, specificity));
        }

        candidates
            .into_iter()
            .max_by_key(|(_, priority, specificity)| (*priority, *specificity))
            .map(|(id, _, _)| id)
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_seconds()
}

/// Case-insensitive `*`-wildcard match.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let text = text.to_ascii_lowercase();

    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return text.len() >= pos + part.len() && text.ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}
