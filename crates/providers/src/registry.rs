//! Provider registry — a name-keyed map of adapters resolved once at
//! startup; no runtime reflection.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::message::ChannelType;

use crate::adapter::ProviderAdapter;

/// Maps provider name -> adapter implementation.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn with(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        tracing::info!(
            provider = provider.name(),
            channel = provider.channel().as_str(),
            "provider registered"
        );
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(name).cloned()
    }

    /// Names of all registered providers serving `channel`.
    pub fn names_for_channel(&self, channel: ChannelType) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .values()
            .filter(|p| p.channel() == channel)
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
