//! Zone definitions, keyed by zone code.

use dashmap::DashMap;
use loomads_core::config::ServingConfig;
use loomads_core::types::Zone;
use std::sync::Arc;
use tracing::info;

/// Read-mostly registry of zone definitions.
pub struct ZoneRegistry {
    zones: DashMap<String, Arc<Zone>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self {
            zones: DashMap::new(),
        }
    }

    pub fn from_zones(zones: Vec<Zone>) -> Self {
        let registry = Self::new();
        registry.replace_all(zones);
        registry
    }

    /// Replace every zone definition with `zones`.
    pub fn replace_all(&self, zones: Vec<Zone>) {
        let codes: Vec<String> = zones.iter().map(|z| z.code.clone()).collect();
        for zone in zones {
            self.zones.insert(zone.code.clone(), Arc::new(zone));
        }
        self.zones.retain(|code, _| codes.contains(code));
        info!(zones = self.zones.len(), "Zone registry loaded");
    }

    pub fn upsert(&self, zone: Zone) {
        self.zones.insert(zone.code.clone(), Arc::new(zone));
    }

    pub fn get(&self, code: &str) -> Option<Arc<Zone>> {
        self.zones.get(code).map(|z| z.value().clone())
    }

    /// A zone that exists, is active, and whose owning app is switched on.
    pub fn get_active(&self, code: &str, serving: &ServingConfig) -> Option<Arc<Zone>> {
        self.get(code)
            .filter(|zone| zone.is_active && serving.app_enabled(zone.app.as_deref()))
    }

    /// All active zones, sorted by code.
    pub fn active_zones(&self) -> Vec<Arc<Zone>> {
        let mut zones: Vec<Arc<Zone>> = self
            .zones
            .iter()
            .filter(|z| z.value().is_active)
            .map(|z| z.value().clone())
            .collect();
        zones.sort_by(|a, b| a.code.cmp(&b.code));
        zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
