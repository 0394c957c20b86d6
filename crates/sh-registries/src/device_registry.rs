//! Device Registry
//!
//! One device per tracked thing, identified by `(domain, id)` pairs and
//! linked to the config entries that provide it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub identifiers: Vec<DeviceIdentifier>,
    pub config_entries: HashSet<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            identifiers: Vec::new(),
            config_entries: HashSet::new(),
            name: name.into(),
            created_at: now,
            modified_at: now,
        }
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    by_id: DashMap<String, Arc<DeviceEntry>>,
    /// "domain:id" -> device id
    by_identifier: DashMap<String, String>,
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier.insert(identifier.key(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
        self.by_id.remove(&entry.id);
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let device_id = self
            .by_identifier
            .get(&DeviceIdentifier::new(domain, id).key())
            .map(|r| r.value().clone())?;
        self.get(&device_id)
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Find a device by any of its identifiers, or create it
    ///
    /// An existing device is linked to `config_entry_id` and renamed to `name`.
    pub fn get_or_create(
        &self,
        identifiers: &[DeviceIdentifier],
        config_entry_id: &str,
        name: &str,
    ) -> Arc<DeviceEntry> {
        let existing = identifiers
            .iter()
            .find_map(|i| self.get_by_identifier(i.domain(), i.id()));

        if let Some(existing) = existing {
            debug!("Found existing device by identifier: {}", existing.id);
            if existing.config_entries.contains(config_entry_id) && existing.name == name {
                return existing;
            }

            self.unindex_entry(&existing);
            let mut entry = (*existing).clone();
            entry.config_entries.insert(config_entry_id.to_string());
            entry.name = name.to_string();
            entry.modified_at = Utc::now();
            let entry = Arc::new(entry);
            self.index_entry(Arc::clone(&entry));
            return entry;
        }

        let mut entry = DeviceEntry::new(name);
        entry.identifiers = identifiers.to_vec();
        entry.config_entries.insert(config_entry_id.to_string());

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        info!("Registered new device: {} ({})", name, entry.id);
        entry
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    /// Detach a config entry from its devices, removing devices left with none
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        for device in self.get_by_config_entry_id(config_entry_id) {
            if device.config_entries.len() <= 1 {
                self.remove(&device.id);
                continue;
            }

            self.unindex_entry(&device);
            let mut entry = (*device).clone();
            entry.config_entries.remove(config_entry_id);
            entry.modified_at = Utc::now();
            self.index_entry(Arc::new(entry));
        }
        self.by_config_entry_id.remove(config_entry_id);
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
