//! subscription_helper integration
//!
//! Tracks subscriptions (streaming, insurance, ...) as config entries. Each
//! entry publishes a days-remaining sensor and a status sensor, refreshed on
//! a timer and rebuilt whenever the entry changes. The `update_options`
//! service patches an entry's stored fields.

mod config_flow;
pub mod consts;
mod record;
mod sensor;
mod services;
mod status;

pub use config_flow::{config_schema, options_schema, SubscriptionFlowHandler};
pub use record::{SubscriptionAttributes, SubscriptionRecord};
pub use sensor::{SensorKind, SensorProjection};
pub use services::{update_options, UpdateOptionsError};
pub use status::{evaluate, Evaluation, SubscriptionStatus};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::{Map, Value};
use sh_config::{SubscriptionHelperConfig, TargetResolution};
use sh_config_entries::{
    ConfigEntry, FlowResultType, IntegrationHandler, UpdateListener, ABORT_ALREADY_CONFIGURED,
};
use sh_core::ListenerHandle;
use sh_event_bus::track_time_interval;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::HomeAssistant;
use consts::{DOMAIN, SERVICE_UPDATE_OPTIONS};

/// Sensors of one loaded entry; dropping this stops the refresh timer
struct LoadedEntry {
    projection: Arc<SensorProjection>,
    _refresh: ListenerHandle,
}

pub struct SubscriptionHelper {
    hass: Weak<HomeAssistant>,
    update_interval: Duration,
    target_resolution: TargetResolution,
    loaded: DashMap<String, LoadedEntry>,
}

impl SubscriptionHelper {
    fn hass(&self) -> Result<Arc<HomeAssistant>, String> {
        self.hass
            .upgrade()
            .ok_or_else(|| "host is shutting down".to_string())
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Projection of a loaded entry
    pub fn projection(&self, entry_id: &str) -> Option<Arc<SensorProjection>> {
        self.loaded.get(entry_id).map(|l| Arc::clone(&l.projection))
    }
}

/// Reload the entry whenever it is updated
fn reload_on_update(hass: Weak<HomeAssistant>) -> UpdateListener {
    Arc::new(move |entry: ConfigEntry| {
        let hass = hass.clone();
        async move {
            let Some(hass) = hass.upgrade() else { return };
            if let Err(err) = hass.config_entries.reload(&entry.entry_id).await {
                warn!("Reload of {} after update failed: {}", entry.entry_id, err);
            }
        }
        .boxed()
    })
}

#[async_trait]
impl IntegrationHandler for SubscriptionHelper {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let hass = self.hass()?;

        let projection = Arc::new(SensorProjection::register(&hass, entry)?);
        projection.refresh();

        let refresh = {
            let projection = Arc::clone(&projection);
            track_time_interval(self.update_interval, move |_| projection.refresh())
        };
        self.loaded.insert(
            entry.entry_id.clone(),
            LoadedEntry {
                projection,
                _refresh: refresh,
            },
        );

        let listener = hass
            .config_entries
            .add_update_listener(&entry.entry_id, reload_on_update(self.hass.clone()));
        hass.config_entries.on_unload(&entry.entry_id, listener);

        if !hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS) {
            services::register(&hass, self.target_resolution);
        }

        debug!("Set up subscription {} ({})", entry.title, entry.entry_id);
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<bool, String> {
        let hass = self.hass()?;

        // The timer stops when the removed value drops
        if let Some((_, loaded)) = self.loaded.remove(&entry.entry_id) {
            loaded.projection.remove();
        }

        // The entry being unloaded is no longer in the loaded state here
        if hass.config_entries.get_loaded_by_domain(DOMAIN).is_empty() {
            hass.services.unregister(DOMAIN, SERVICE_UPDATE_OPTIONS);
        }

        debug!("Unloaded subscription {} ({})", entry.title, entry.entry_id);
        Ok(true)
    }
}

/// Register the integration and its flows with the host
pub fn register(hass: &Arc<HomeAssistant>, config: &SubscriptionHelperConfig) -> Arc<SubscriptionHelper> {
    let helper = Arc::new(SubscriptionHelper {
        hass: Arc::downgrade(hass),
        update_interval: Duration::from_secs(config.update_interval),
        target_resolution: config.target_resolution,
        loaded: DashMap::new(),
    });

    hass.config_entries
        .register_handler(DOMAIN, helper.clone() as Arc<dyn IntegrationHandler>);
    hass.flows
        .register_handler(DOMAIN, Arc::new(SubscriptionFlowHandler));

    info!(
        "Registered {} (refresh every {}s, target resolution {:?})",
        DOMAIN, config.update_interval, config.target_resolution
    );
    helper
}

/// Create entries for subscriptions declared in configuration.yaml
///
/// Returns how many new entries were created. Names that already have an
/// entry are skipped; invalid declarations are logged and skipped.
pub async fn import_subscriptions(hass: &HomeAssistant, subscriptions: &[Map<String, Value>]) -> usize {
    let mut created = 0;

    for subscription in subscriptions {
        match hass.flows.import(DOMAIN, subscription).await {
            Ok(result) if result.result_type == FlowResultType::CreateEntry => {
                info!("Imported subscription {}", result.title.unwrap_or_default());
                created += 1;
            }
            Ok(result) if result.reason.as_deref() == Some(ABORT_ALREADY_CONFIGURED) => {
                debug!("Subscription already configured, skipping import");
            }
            Ok(result) => {
                warn!(
                    "Skipped subscription from configuration: {} {:?}",
                    result.reason.unwrap_or_default(),
                    result.errors.unwrap_or_default()
                );
            }
            Err(err) => warn!("Import of subscription failed: {}", err),
        }
    }

    created
}
