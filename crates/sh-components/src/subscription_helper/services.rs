//! The `update_options` service
//!
//! Patches the options of one subscription entry. The entry's update
//! listener then reloads it, which rebuilds both sensors.

use serde_json::{json, Map, Value};
use sh_config::TargetResolution;
use sh_config_entries::{describe_errors, ConfigEntriesError, ConfigEntryUpdate, FieldErrors};
use sh_core::ServiceCall;
use sh_service_registry::{ServiceDescription, ServiceError};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info};

use super::config_flow::options_schema;
use super::consts::*;
use crate::HomeAssistant;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateOptionsError {
    #[error("no subscription entry could be resolved from the call; provide config_entry_id or the entity_id of a subscription sensor")]
    TargetNotResolved,

    #[error("config entry {0} not found")]
    RecordNotFound(String),

    #[error("config entry {entry_id} belongs to {domain}, not subscription_helper")]
    WrongRecordKind { entry_id: String, domain: String },

    #[error("invalid options: {}", describe_errors(.0))]
    Validation(FieldErrors),

    #[error("updating config entry {entry_id} failed: {reason}")]
    UpdateFailed { entry_id: String, reason: String },
}

impl From<UpdateOptionsError> for ServiceError {
    fn from(err: UpdateOptionsError) -> Self {
        match err {
            UpdateOptionsError::UpdateFailed { .. } => ServiceError::CallFailed(err.to_string()),
            other => ServiceError::Validation(other.to_string()),
        }
    }
}

fn non_empty_str<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Find the config entry id a call targets
///
/// `config_entry_id` wins over `entity_id`; the latter is only consulted
/// under [`TargetResolution::EntryOrEntity`].
fn resolve_target(
    hass: &HomeAssistant,
    policy: TargetResolution,
    data: &Map<String, Value>,
) -> Result<String, UpdateOptionsError> {
    if let Some(entry_id) = non_empty_str(data, ATTR_CONFIG_ENTRY_ID) {
        return Ok(entry_id.to_string());
    }

    if policy == TargetResolution::EntryIdOnly {
        return Err(UpdateOptionsError::TargetNotResolved);
    }

    let entity_id =
        non_empty_str(data, ATTR_ENTITY_ID).ok_or(UpdateOptionsError::TargetNotResolved)?;
    hass.registries
        .entities
        .get(entity_id)
        .and_then(|e| e.config_entry_id.clone())
        .ok_or(UpdateOptionsError::TargetNotResolved)
}

/// Validate a patch and merge it into the target entry's options
pub async fn update_options(
    hass: &HomeAssistant,
    policy: TargetResolution,
    data: &Map<String, Value>,
) -> Result<(), UpdateOptionsError> {
    let entry_id = resolve_target(hass, policy, data)?;

    let entry = hass
        .config_entries
        .get(&entry_id)
        .ok_or_else(|| UpdateOptionsError::RecordNotFound(entry_id.clone()))?;

    if entry.domain != DOMAIN {
        return Err(UpdateOptionsError::WrongRecordKind {
            entry_id,
            domain: entry.domain,
        });
    }

    let patch: Map<String, Value> = data
        .iter()
        .filter(|(k, _)| k.as_str() != ATTR_CONFIG_ENTRY_ID && k.as_str() != ATTR_ENTITY_ID)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let patch = options_schema()
        .validate_partial(&patch)
        .map_err(UpdateOptionsError::Validation)?;

    let fields: Vec<String> = patch.keys().cloned().collect();
    let mut options = entry.options.clone();
    for (key, value) in patch {
        if !value.is_null() {
            options.insert(key, value);
        } else if entry.data.contains_key(&key) {
            // Shadow the creation value
            options.insert(key, Value::Null);
        } else {
            options.remove(&key);
        }
    }

    hass.config_entries
        .update(&entry_id, ConfigEntryUpdate::new().options(options))
        .await
        .map_err(|err| match err {
            ConfigEntriesError::NotFound(id) => UpdateOptionsError::RecordNotFound(id),
            other => UpdateOptionsError::UpdateFailed {
                entry_id: entry_id.clone(),
                reason: other.to_string(),
            },
        })?;

    info!(
        "Updated options of {} ({}): {:?}",
        entry.title, entry_id, fields
    );
    Ok(())
}

/// Register `subscription_helper.update_options`
pub(crate) fn register(hass: &Arc<HomeAssistant>, policy: TargetResolution) {
    let weak: Weak<HomeAssistant> = Arc::downgrade(hass);

    let mut description = ServiceDescription::new(DOMAIN, SERVICE_UPDATE_OPTIONS);
    description.name = Some("Update options".to_string());
    description.description =
        Some("Update the stored fields of a subscription and reload it".to_string());
    description.fields = Some(json!({
        ATTR_CONFIG_ENTRY_ID: {"selector": {"config_entry": {"integration": DOMAIN}}},
        ATTR_ENTITY_ID: {"selector": {"entity": {"integration": DOMAIN}}},
        CONF_END_DATE: {"selector": {"date": {}}},
        CONF_COST: {"selector": {"number": {"min": 0, "step": 0.01}}},
        CONF_RENEWAL_PERIOD: {"selector": {"select": {"options": RENEWAL_PERIODS}}},
        CONF_PROVIDER: {"selector": {"text": {}}},
        CONF_CANCELLATION_PERIOD: {"selector": {"number": {"min": 0, "max": 365}}},
        CONF_CONTRACT_LENGTH: {"selector": {"number": {"min": 1, "max": 120}}},
        CONF_PAYMENT_METHOD: {"selector": {"text": {}}},
        CONF_ACCOUNT_NUMBER: {"selector": {"text": {}}},
        CONF_NOTES: {"selector": {"text": {"multiline": true}}},
    }));

    hass.services
        .register_with_description(description, move |call: ServiceCall| {
            let weak = weak.clone();
            async move {
                let hass = weak
                    .upgrade()
                    .ok_or_else(|| ServiceError::CallFailed("host is shutting down".to_string()))?;
                let data = call.data().cloned().unwrap_or_default();
                update_options(&hass, policy, &data).await?;
                Ok::<(), ServiceError>(())
            }
        });
    debug!("Registered {}.{}", DOMAIN, SERVICE_UPDATE_OPTIONS);
}
