//! Suppression lists — do-not-contact management consulted before every
//! delivery attempt.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an identifier was added to the suppression list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    #[default]
    UserOptOut,
    Bounced,
    Complained,
    Regulatory,
    AdminAction,
}

/// A single suppression record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    /// The suppressed identifier (address or contact id).
    pub identifier: String,
    pub reason: SuppressionReason,
    pub created_at: DateTime<Utc>,
    /// If set, the entry automatically expires at this time.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Compliance gate consulted before every attempt.
pub trait SuppressionCheck: Send + Sync {
    fn is_suppressed(&self, contact_id: &Uuid, address: &str) -> bool;
}

/// Thread-safe suppression list backed by `DashMap`.
pub struct SuppressionList {
    entries: DashMap<String, Vec<SuppressionEntry>>,
}

impl SuppressionList {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a suppression entry for `identifier`.
    ///
    /// * `ttl_days` - optional time-to-live; the entry auto-expires after
    ///   this period.
    pub fn add(
        &self,
        identifier: &str,
        reason: SuppressionReason,
        ttl_days: Option<u32>,
    ) -> SuppressionEntry {
        let now = Utc::now();
        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            reason,
            created_at: now,
            expires_at: ttl_days.map(|d| now + Duration::days(i64::from(d))),
        };

        self.entries
            .entry(identifier.to_string())
            .or_default()
            .push(entry.clone());

        tracing::info!(identifier, reason = ?entry.reason, "suppression entry added");
        entry
    }

    /// Remove all entries for `identifier`. Returns the number removed.
    pub fn remove(&self, identifier: &str) -> usize {
        self.entries
            .remove(identifier)
            .map(|(_, entries)| entries.len())
            .unwrap_or(0)
    }

    fn has_active_entry(&self, identifier: &str) -> bool {
        let now = Utc::now();
        self.entries
            .get(identifier)
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| e.expires_at.map(|exp| exp > now).unwrap_or(true))
            })
            .unwrap_or(false)
    }
}

impl SuppressionCheck for SuppressionList {
    fn is_suppressed(&self, contact_id: &Uuid, address: &str) -> bool {
        self.has_active_entry(&contact_id.to_string()) || self.has_active_entry(address)
    }
}

impl Default for SuppressionList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_by_address() {
        let list = SuppressionList::new();
        list.add("+15551234567", SuppressionReason::UserOptOut, None);

        let contact = Uuid::new_v4();
        assert!(list.is_suppressed(&contact, "+15551234567"));
        assert!(!list.is_suppressed(&contact, "+15559999999"));
    }

    #[test]
    fn test_suppressed_by_contact_id() {
        let list = SuppressionList::new();
        let contact = Uuid::new_v4();
        list.add(&contact.to_string(), SuppressionReason::Regulatory, None);

        assert!(list.is_suppressed(&contact, "anything@example.com"));
    }

    #[test]
    fn test_remove_lifts_suppression() {
        let list = SuppressionList::new();
        let contact = Uuid::new_v4();
        list.add("user@example.com", SuppressionReason::Bounced, None);
        assert!(list.is_suppressed(&contact, "user@example.com"));

        assert_eq!(list.remove("user@example.com"), 1);
        assert!(!list.is_suppressed(&contact, "user@example.com"));
    }

    #[test]
    fn test_expired_entry_ignored() {
        let list = SuppressionList::new();
        let contact = Uuid::new_v4();
        let entry = list.add("user@example.com", SuppressionReason::Complained, Some(30));

        // Force-expire the entry.
        list.entries.get_mut("user@example.com").unwrap()[0].expires_at =
            Some(Utc::now() - Duration::hours(1));
        assert!(!list.is_suppressed(&contact, "user@example.com"));
        assert!(entry.expires_at.is_some());
    }
}
