//! Entity and device registries
//!
//! The entity registry maps platform unique ids to entity ids so an entity
//! keeps its id across reloads. The device registry groups an entry's
//! entities under one device. Both live in memory only.

pub mod device_registry;
pub mod entity_registry;

pub use device_registry::{DeviceEntry, DeviceIdentifier, DeviceRegistry};
pub use entity_registry::{EntityEntry, EntityRegistration, EntityRegistry, EntityRegistryError};

use tracing::debug;

/// All registries bundled together
#[derive(Default)]
pub struct Registries {
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entity and device that belongs only to a config entry
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        let removed = self.entities.remove_config_entry(config_entry_id);
        self.devices.clear_config_entry(config_entry_id);
        debug!(
            config_entry_id = %config_entry_id,
            entities = removed.len(),
            "Cleared registries for config entry"
        );
    }
}
