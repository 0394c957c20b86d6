//! Entity Registry
//!
//! Tracks registered entities by entity id, with secondary indexes on the
//! platform unique id, config entry and device.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// A registered entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Registry-internal id
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    pub unique_id: String,
    /// Integration that provides this entity
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<String>,
    #[serde(default)]
    pub has_entity_name: bool,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id: unique_id.into(),
            platform: platform.into(),
            config_entry_id: None,
            device_id: None,
            original_name: None,
            original_icon: None,
            original_device_class: None,
            unit_of_measurement: None,
            translation_key: None,
            has_entity_name: false,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }
}

/// Arguments to [`EntityRegistry::get_or_create`]
#[derive(Debug, Clone, Copy)]
pub struct EntityRegistration<'a> {
    pub domain: &'a str,
    pub platform: &'a str,
    pub unique_id: &'a str,
    /// Object id to try first when a new entity id is generated
    pub suggested_object_id: &'a str,
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
}

type UniqueKey = (String, String, String);

/// Entity registry with multi-index lookups
///
/// Entries are stored as `Arc<EntityEntry>` so reads never clone the entry.
#[derive(Default)]
pub struct EntityRegistry {
    /// Primary index, in registration order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,
    /// (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<UniqueKey, String>,
    by_config_entry_id: DashMap<String, HashSet<String>>,
    by_device_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn unique_key(entry: &EntityEntry) -> UniqueKey {
        (
            entry.domain().to_string(),
            entry.platform.clone(),
            entry.unique_id.clone(),
        )
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        self.by_unique_id
            .insert(Self::unique_key(&entry), entity_id.clone());

        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Remove from the secondary indexes; the caller owns the primary one
    fn unindex_secondary(&self, entry: &EntityEntry) {
        self.by_unique_id.remove(&Self::unique_key(entry));

        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.entity_id);
            }
        }

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(&entry.entity_id);
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    pub fn get_by_unique_id(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
    ) -> Option<Arc<EntityEntry>> {
        let key = (domain.to_string(), platform.to_string(), unique_id.to_string());
        let entity_id = self.by_unique_id.get(&key).map(|r| r.value().clone())?;
        self.get(&entity_id)
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Return the entity registered under the unique id, or register a new one
    ///
    /// A new entity gets the first free id among `{domain}.{suggested}`,
    /// `{domain}.{suggested}_2`, `{domain}.{suggested}_3`, ...
    #[instrument(skip(self, registration), fields(unique_id = %registration.unique_id))]
    pub fn get_or_create(&self, registration: EntityRegistration<'_>) -> Arc<EntityEntry> {
        if let Some(existing) = self.get_by_unique_id(
            registration.domain,
            registration.platform,
            registration.unique_id,
        ) {
            debug!(entity_id = %existing.entity_id, "Found existing entity by unique_id");
            return existing;
        }

        let entity_id =
            self.generate_entity_id(registration.domain, registration.suggested_object_id);
        let mut entry = EntityEntry::new(
            entity_id.clone(),
            registration.platform,
            registration.unique_id,
        );
        entry.config_entry_id = registration.config_entry_id.map(String::from);
        entry.device_id = registration.device_id.map(String::from);

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));

        info!("Registered new entity: {}", entity_id);
        entry
    }

    /// Apply `f` to a copy of the entry and store the result
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let current = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        self.unindex_secondary(&current);

        let mut entry = (*current).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;

        self.unindex_secondary(&entry);
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    /// Remove every entity created by a config entry, returning their ids
    pub fn remove_config_entry(&self, config_entry_id: &str) -> Vec<String> {
        let entity_ids: Vec<String> = self
            .get_by_config_entry_id(config_entry_id)
            .iter()
            .map(|e| e.entity_id.clone())
            .collect();

        for entity_id in &entity_ids {
            self.remove(entity_id);
        }
        self.by_config_entry_id.remove(config_entry_id);
        entity_ids
    }

    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// First free `{domain}.{object_id}`, suffixing `_2`, `_3`, ... on collision
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let preferred = format!("{}.{}", domain, suggested_object_id);
        if !self.is_registered(&preferred) {
            return preferred;
        }

        (2..)
            .map(|n| format!("{}_{}", preferred, n))
            .find(|candidate| !self.is_registered(candidate))
            .unwrap_or(preferred)
    }

    /// All entries in registration order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
