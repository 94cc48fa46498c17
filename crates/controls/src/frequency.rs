//! Frequency control — per (contact, tenant) caps on how often a contact
//! may be messaged within a day, week, or month.

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use courier_core::config::FrequencyConfig;
use courier_core::limits::FrequencyControl;

/// Thread-safe frequency limiter backed by `DashMap`.
///
/// Records are created lazily with platform-default caps. Counters roll
/// over lazily by comparing the date parts of `last_sent_at` against the
/// current instant; checks and increments each run under the per-key lock.
pub struct FrequencyLimiter {
    controls: DashMap<(Uuid, String), FrequencyControl>,
    defaults: FrequencyConfig,
}

impl FrequencyLimiter {
    pub fn new(defaults: FrequencyConfig) -> Self {
        Self {
            controls: DashMap::new(),
            defaults,
        }
    }

    /// Whether the contact is still under all three caps.
    pub fn can_send(&self, contact_id: Uuid, tenant_id: &str) -> bool {
        self.can_send_at(contact_id, tenant_id, Utc::now())
    }

    pub fn can_send_at(&self, contact_id: Uuid, tenant_id: &str, now: DateTime<Utc>) -> bool {
        let mut control = self.get_or_create(contact_id, tenant_id);
        Self::rollover(&mut control, now);

        if control.sent_today >= control.max_per_day {
            tracing::warn!(contact_id = %contact_id, tenant_id, "daily frequency cap reached");
            return false;
        }
        if control.sent_this_week >= control.max_per_week {
            tracing::warn!(contact_id = %contact_id, tenant_id, "weekly frequency cap reached");
            return false;
        }
        if control.sent_this_month >= control.max_per_month {
            tracing::warn!(contact_id = %contact_id, tenant_id, "monthly frequency cap reached");
            return false;
        }
        true
    }

    /// Record an attempted send. Called only after a send was actually
    /// attempted, never on a bare check, so counters are not overspent.
    pub fn record_sent(&self, contact_id: Uuid, tenant_id: &str) {
        self.record_sent_at(contact_id, tenant_id, Utc::now());
    }

    pub fn record_sent_at(&self, contact_id: Uuid, tenant_id: &str, now: DateTime<Utc>) {
        let mut control = self.get_or_create(contact_id, tenant_id);
        Self::rollover(&mut control, now);

        control.sent_today += 1;
        control.sent_this_week += 1;
        control.sent_this_month += 1;
        control.last_sent_at = Some(now);
        control.updated_at = now;

        tracing::debug!(
            contact_id = %contact_id,
            tenant_id,
            daily = control.sent_today,
            weekly = control.sent_this_week,
            monthly = control.sent_this_month,
            "send recorded"
        );
    }

    /// Override caps for one contact.
    pub fn set_limits(
        &self,
        contact_id: Uuid,
        tenant_id: &str,
        max_per_day: u32,
        max_per_week: u32,
        max_per_month: u32,
    ) {
        let mut control = self.get_or_create(contact_id, tenant_id);
        control.max_per_day = max_per_day;
        control.max_per_week = max_per_week;
        control.max_per_month = max_per_month;
        control.updated_at = Utc::now();
    }

    /// Snapshot of the counters for one contact, for dashboards.
    pub fn status(&self, contact_id: Uuid, tenant_id: &str) -> Option<FrequencyControl> {
        self.controls
            .get(&(contact_id, tenant_id.to_string()))
            .map(|c| c.clone())
    }

    /// Zero the daily counter on every record (periodic sweep).
    pub fn reset_daily(&self) {
        for mut entry in self.controls.iter_mut() {
            entry.sent_today = 0;
            entry.updated_at = Utc::now();
        }
        tracing::info!(count = self.controls.len(), "daily frequency counters reset");
    }

    /// Zero the weekly counter on every record (periodic sweep).
    pub fn reset_weekly(&self) {
        for mut entry in self.controls.iter_mut() {
            entry.sent_this_week = 0;
            entry.updated_at = Utc::now();
        }
        tracing::info!(count = self.controls.len(), "weekly frequency counters reset");
    }

    /// Zero the monthly counter on every record (periodic sweep).
    pub fn reset_monthly(&self) {
        for mut entry in self.controls.iter_mut() {
            entry.sent_this_month = 0;
            entry.updated_at = Utc::now();
        }
        tracing::info!(count = self.controls.len(), "monthly frequency counters reset");
    }

    fn get_or_create(
        &self,
        contact_id: Uuid,
        tenant_id: &str,
    ) -> dashmap::mapref::one::RefMut<'_, (Uuid, String), FrequencyControl> {
        self.controls
            .entry((contact_id, tenant_id.to_string()))
            .or_insert_with(|| FrequencyControl {
                contact_id,
                tenant_id: tenant_id.to_string(),
                max_per_day: self.defaults.max_per_day,
                max_per_week: self.defaults.max_per_week,
                max_per_month: self.defaults.max_per_month,
                sent_today: 0,
                sent_this_week: 0,
                sent_this_month: 0,
                last_sent_at: None,
                updated_at: Utc::now(),
            })
    }

    /// Zero any counter whose day/week/month has rolled over since the
    /// last recorded send. Weeks follow ISO 8601 (Monday start).
    fn rollover(control: &mut FrequencyControl, now: DateTime<Utc>) {
        let last = match control.last_sent_at {
            Some(last) => last,
            None => return,
        };

        if last.date_naive() < now.date_naive() {
            control.sent_today = 0;
        }

        let last_week = (last.iso_week().year(), last.iso_week().week());
        let now_week = (now.iso_week().year(), now.iso_week().week());
        if last_week != now_week {
            control.sent_this_week = 0;
        }

        if (last.year(), last.month()) != (now.year(), now.month()) {
            control.sent_this_month = 0;
        }
    }
}
