//! Routing-config table — per-channel policy rows with priority-based
//! selection of the active config.

use dashmap::DashMap;
use uuid::Uuid;

use courier_core::message::ChannelType;
use courier_core::routing::ChannelRoutingConfig;

/// Keyed store of channel routing configs.
pub struct RoutingTable {
    configs: DashMap<Uuid, ChannelRoutingConfig>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }

    pub fn upsert(&self, config: ChannelRoutingConfig) -> Uuid {
        let id = config.id;
        tracing::info!(
            channel = config.channel.as_str(),
            primary = %config.primary_provider,
            priority = config.priority,
            "routing config stored"
        );
        self.configs.insert(id, config);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<ChannelRoutingConfig> {
        self.configs.get(id).map(|c| c.clone())
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.configs.remove(id).is_some()
    }

    /// The active config for a channel: highest priority among active rows.
    pub fn active_config(&self, channel: ChannelType) -> Option<ChannelRoutingConfig> {
        self.configs
            .iter()
            .filter(|entry| entry.value().channel == channel && entry.value().active)
            .max_by_key(|entry| entry.value().priority)
            .map(|entry| entry.value().clone())
    }

    /// All configs, ordered by channel then priority descending.
    pub fn all(&self) -> Vec<ChannelRoutingConfig> {
        let mut configs: Vec<ChannelRoutingConfig> = self
            .configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by(|a, b| {
            a.channel
                .as_str()
                .cmp(b.channel.as_str())
                .then(b.priority.cmp(&a.priority))
        });
        configs
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_config_by_priority() {
        let table = RoutingTable::new();
        table.upsert(
            ChannelRoutingConfig::new(ChannelType::Sms, "low-priority").with_priority(1),
        );
        table.upsert(
            ChannelRoutingConfig::new(ChannelType::Sms, "high-priority").with_priority(10),
        );

        let active = table.active_config(ChannelType::Sms).unwrap();
        assert_eq!(active.primary_provider, "high-priority");
    }

    #[test]
    fn test_inactive_configs_skipped() {
        let table = RoutingTable::new();
        let mut config = ChannelRoutingConfig::new(ChannelType::Email, "mock-email");
        config.active = false;
        table.upsert(config);

        assert!(table.active_config(ChannelType::Email).is_none());
    }

    #[test]
    fn test_no_config_for_channel() {
        let table = RoutingTable::new();
        table.upsert(ChannelRoutingConfig::new(ChannelType::Sms, "mock-sms"));
        assert!(table.active_config(ChannelType::Mms).is_none());
    }
}
