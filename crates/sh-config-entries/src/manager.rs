//! Config Entries Manager
//!
//! Owns every config entry, drives setup/unload through the registered
//! [`IntegrationHandler`] for the entry's domain, and notifies update
//! listeners when an entry's title, data or options change.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use sh_core::ListenerHandle;
use sh_registries::Registries;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::InvalidTransition;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Integration side of the entry lifecycle
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String>;

    /// Tear down what setup created; `Ok(false)` means the unload was refused
    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<bool, String>;

    /// Called after a removed entry has been unloaded
    async fn remove_entry(&self, _entry: &ConfigEntry) {}
}

/// Called with the updated entry after its title, data or options change
pub type UpdateListener = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, ()> + Send + Sync>;

type ListenerMap = DashMap<String, Vec<(u64, UpdateListener)>>;

pub struct ConfigEntries {
    registries: Arc<Registries>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// domain -> entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload
    setup_lock: Mutex<()>,

    handlers: DashMap<String, Arc<dyn IntegrationHandler>>,

    update_listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,

    /// Released when the entry unloads
    unload_handles: DashMap<String, Vec<ListenerHandle>>,
}

impl ConfigEntries {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self {
            registries,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
            update_listeners: Arc::new(DashMap::new()),
            next_listener_id: AtomicU64::new(0),
            unload_handles: DashMap::new(),
        }
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let ids: Vec<String> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut entries: Vec<ConfigEntry> = ids.iter().filter_map(|id| self.get(id)).collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .filter(|e| e.is_loaded())
            .collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// All entries, oldest first
    pub fn all(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register_handler(&self, domain: &str, handler: Arc<dyn IntegrationHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered integration handler for domain: {}", domain);
    }

    pub fn has_handler(&self, domain: &str) -> bool {
        self.handlers.contains_key(domain)
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn IntegrationHandler>> {
        self.handlers.get(domain).map(|h| Arc::clone(h.value()))
    }

    pub fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Apply an update and, if anything changed, await the entry's update listeners
    ///
    /// Returns the entry as it stands after the listeners ran.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut updated = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let mut changed = false;
        if let Some(title) = update.title {
            changed |= updated.title != title;
            updated.title = title;
        }
        if let Some(data) = update.data {
            changed |= updated.data != data;
            updated.data = data;
        }
        if let Some(options) = update.options {
            changed |= updated.options != options;
            updated.options = options;
        }

        if !changed {
            debug!("Config entry {} unchanged", entry_id);
            return Ok(updated);
        }

        updated.modified_at = Utc::now();
        self.index_entry(&updated);
        debug!("Updated config entry: {}", entry_id);

        let listeners: Vec<UpdateListener> = self
            .update_listeners
            .get(entry_id)
            .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(updated.clone()).await;
        }

        Ok(self.get(entry_id).unwrap_or(updated))
    }

    /// Register a listener for changes to one entry
    ///
    /// The listener stays registered until the returned handle drops.
    pub fn add_update_listener(&self, entry_id: &str, listener: UpdateListener) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push((id, listener));

        let listeners = Arc::downgrade(&self.update_listeners);
        let entry_id = entry_id.to_string();
        ListenerHandle::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                if let Some(mut ls) = listeners.get_mut(&entry_id) {
                    ls.retain(|(i, _)| *i != id);
                }
            }
        })
    }

    /// Keep `handle` alive until the entry next unloads
    pub fn on_unload(&self, entry_id: &str, handle: ListenerHandle) {
        self.unload_handles
            .entry(entry_id.to_string())
            .or_default()
            .push(handle);
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.handler(&entry.domain) else {
            self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No integration handler for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(reason) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                // Anything registered during the failed setup goes with it
                self.unload_handles.remove(entry_id);
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Unload an entry; a no-op when it is not loaded
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let result = match self.handler(&entry.domain) {
            Some(handler) if entry.state == ConfigEntryState::Loaded => {
                handler.unload_entry(&entry).await
            }
            _ => Ok(true),
        };

        match result {
            Ok(true) => {
                // Dropped outside the map guard; handles may touch other maps
                let handles = self.unload_handles.remove(entry_id).map(|(_, h)| h);
                drop(handles);
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Ok(false) => {
                let reason = "integration refused to unload".to_string();
                self.set_state(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
            Err(reason) => {
                warn!("Unload failed for entry {}: {}", entry_id, reason);
                self.set_state(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        debug!("Reloading entry: {}", entry_id);
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    /// Unload and delete an entry along with its entities and devices
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.unload(entry_id).await?;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(handler) = self.handler(&entry.domain) {
            handler.remove_entry(&entry).await;
        }

        self.registries.clear_config_entry(entry_id);
        self.update_listeners.remove(entry_id);
        self.unindex_entry(&entry);

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    /// Set up every entry that is not loaded yet
    pub async fn setup_all(&self) -> Vec<ConfigEntriesResult<()>> {
        let pending: Vec<String> = self
            .all()
            .into_iter()
            .filter(|e| e.state == ConfigEntryState::NotLoaded)
            .map(|e| e.entry_id)
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for entry_id in pending {
            results.push(self.setup(&entry_id).await);
        }
        results
    }
}
