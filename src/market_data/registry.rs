// =============================================================================
// Provider Registry — process-wide name -> MarketDataProvider map
// =============================================================================
//
// Registration happens once at startup; lookups happen continuously from
// every agent's cycle. A reader-writer lock keeps concurrent lookups
// non-blocking against each other while still allowing late registration.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::market_data::provider::MarketDataProvider;

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn MarketDataProvider>>>,
    default_name: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_name: RwLock::new(None),
        }
    }

    /// Register a provider under its own `name()`. If this is the first
    /// provider registered, it becomes the default.
    pub fn register(&self, provider: Arc<dyn MarketDataProvider>) {
        let name = provider.name().to_string();
        self.providers.write().insert(name.clone(), provider);
        let mut default = self.default_name.write();
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Explicitly set the default provider by name. No-op if unregistered.
    pub fn set_default(&self, name: &str) -> bool {
        if self.providers.read().contains_key(name) {
            *self.default_name.write() = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MarketDataProvider>> {
        self.providers.read().get(name).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn MarketDataProvider>> {
        let name = self.default_name.read().clone()?;
        self.get(&name)
    }

    pub fn resolve(&self, override_name: Option<&str>) -> Option<Arc<dyn MarketDataProvider>> {
        match override_name {
            Some(name) => self.get(name),
            None => self.default_provider(),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
