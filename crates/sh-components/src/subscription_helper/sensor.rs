//! Days-remaining and status sensors for one subscription

use serde_json::{json, Value};
use sh_config_entries::ConfigEntry;
use sh_core::{slugify, Context, EntityId, STATE_UNKNOWN};
use sh_registries::{DeviceIdentifier, EntityRegistration};
use sh_state_machine::StateMachine;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::consts::DOMAIN;
use super::record::SubscriptionRecord;
use super::status::SubscriptionStatus;
use crate::{Clock, HomeAssistant};

const SENSOR_DOMAIN: &str = "sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    DaysRemaining,
    Status,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::DaysRemaining, SensorKind::Status];

    /// `{entry_id}_{suffix}` in the entity registry
    fn unique_id_suffix(self) -> &'static str {
        match self {
            SensorKind::DaysRemaining => "days",
            SensorKind::Status => "status",
        }
    }

    fn translation_key(self) -> &'static str {
        match self {
            SensorKind::DaysRemaining => "days_remaining",
            SensorKind::Status => "status",
        }
    }

    fn name(self) -> &'static str {
        match self {
            SensorKind::DaysRemaining => "Days remaining",
            SensorKind::Status => "Status",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            SensorKind::DaysRemaining => "mdi:calendar-clock",
            SensorKind::Status => "mdi:information",
        }
    }

    fn unit_of_measurement(self) -> Option<&'static str> {
        match self {
            SensorKind::DaysRemaining => Some("days"),
            SensorKind::Status => None,
        }
    }

    fn device_class(self) -> Option<&'static str> {
        match self {
            SensorKind::DaysRemaining => None,
            SensorKind::Status => Some("enum"),
        }
    }

    pub fn unique_id(self, entry_id: &str) -> String {
        format!("{}_{}", entry_id, self.unique_id_suffix())
    }
}

/// The two sensors of one config entry
///
/// Built from a snapshot of the entry; any change to the entry reloads it,
/// which builds a fresh projection.
pub struct SensorProjection {
    entry: ConfigEntry,
    days_remaining: EntityId,
    status: EntityId,
    states: Arc<StateMachine>,
    clock: Arc<dyn Clock>,
}

impl SensorProjection {
    /// Register the device and both entities, reusing ids from earlier loads
    pub fn register(hass: &HomeAssistant, entry: &ConfigEntry) -> Result<Self, String> {
        let device = hass.registries.devices.get_or_create(
            &[DeviceIdentifier::new(DOMAIN, entry.entry_id.as_str())],
            &entry.entry_id,
            &entry.title,
        );

        let mut object_base = slugify(&entry.title);
        if object_base.is_empty() {
            object_base = entry.entry_id.to_lowercase();
        }

        let register = |kind: SensorKind| -> Result<EntityId, String> {
            let unique_id = kind.unique_id(&entry.entry_id);
            let suggested = format!("{}_{}", object_base, kind.translation_key());
            let registered = hass.registries.entities.get_or_create(EntityRegistration {
                domain: SENSOR_DOMAIN,
                platform: DOMAIN,
                unique_id: &unique_id,
                suggested_object_id: &suggested,
                config_entry_id: Some(&entry.entry_id),
                device_id: Some(&device.id),
            });

            hass.registries
                .entities
                .update(&registered.entity_id, |e| {
                    e.device_id = Some(device.id.clone());
                    e.original_name = Some(kind.name().to_string());
                    e.original_icon = Some(kind.icon().to_string());
                    e.original_device_class = kind.device_class().map(String::from);
                    e.unit_of_measurement = kind.unit_of_measurement().map(String::from);
                    e.translation_key = Some(kind.translation_key().to_string());
                    e.has_entity_name = true;
                })
                .map_err(|e| e.to_string())?;

            registered
                .entity_id
                .parse::<EntityId>()
                .map_err(|e| format!("invalid entity id {}: {}", registered.entity_id, e))
        };

        let days_remaining = register(SensorKind::DaysRemaining)?;
        let status = register(SensorKind::Status)?;
        debug!(
            "Registered sensors {} and {} for {}",
            days_remaining, status, entry.entry_id
        );

        Ok(Self {
            entry: entry.clone(),
            days_remaining,
            status,
            states: hass.states.clone(),
            clock: hass.clock.clone(),
        })
    }

    pub fn entity_id(&self, kind: SensorKind) -> &EntityId {
        match kind {
            SensorKind::DaysRemaining => &self.days_remaining,
            SensorKind::Status => &self.status,
        }
    }

    /// Recompute both sensors and write them to the state machine
    pub fn refresh(&self) {
        let record = SubscriptionRecord::from_entry(&self.entry);
        let eval = record.evaluate(self.clock.today());
        let context = Context::new();

        let days = eval
            .days_remaining
            .map_or_else(|| STATE_UNKNOWN.to_string(), |d| d.to_string());
        self.states.set(
            self.days_remaining.clone(),
            days,
            self.base_attributes(SensorKind::DaysRemaining),
            context.clone(),
        );

        let mut attributes = self.base_attributes(SensorKind::Status);
        match serde_json::to_value(record.attributes()) {
            Ok(Value::Object(side)) => attributes.extend(side),
            Ok(_) => {}
            Err(err) => warn!("Failed to serialize attributes of {}: {}", self.status, err),
        }
        self.states
            .set(self.status.clone(), eval.status.as_str(), attributes, context);
    }

    /// Remove both sensors' states
    pub fn remove(&self) {
        let context = Context::new();
        for kind in SensorKind::ALL {
            self.states.remove(self.entity_id(kind), context.clone());
        }
    }

    fn base_attributes(&self, kind: SensorKind) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        attributes.insert(
            "friendly_name".to_string(),
            json!(format!("{} {}", self.entry.title, kind.name())),
        );
        attributes.insert("icon".to_string(), json!(kind.icon()));
        if let Some(unit) = kind.unit_of_measurement() {
            attributes.insert("unit_of_measurement".to_string(), json!(unit));
        }
        if let Some(device_class) = kind.device_class() {
            attributes.insert("device_class".to_string(), json!(device_class));
        }
        if kind == SensorKind::Status {
            let options: Vec<&str> = SubscriptionStatus::ALL.iter().map(|s| s.as_str()).collect();
            attributes.insert("options".to_string(), json!(options));
        }
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use chrono::NaiveDate;
    use serde_json::json;

    fn hass() -> HomeAssistant {
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        HomeAssistant::with_clock(Arc::new(FixedClock::new(today)))
    }

    fn entry(title: &str, data: Value) -> ConfigEntry {
        ConfigEntry::new(DOMAIN, title).with_data(serde_json::from_value(data).unwrap())
    }

    #[test]
    fn test_entity_ids_follow_title() {
        let hass = hass();
        let entry = entry("Disney+ Family", json!({}));
        let projection = SensorProjection::register(&hass, &entry).unwrap();

        assert_eq!(
            projection.entity_id(SensorKind::DaysRemaining).to_string(),
            "sensor.disney_family_days_remaining"
        );
        assert_eq!(
            projection.entity_id(SensorKind::Status).to_string(),
            "sensor.disney_family_status"
        );

        let registered = hass
            .registries
            .entities
            .get_by_unique_id("sensor", DOMAIN, &format!("{}_days", entry.entry_id))
            .unwrap();
        assert_eq!(registered.unit_of_measurement.as_deref(), Some("days"));
        assert_eq!(registered.config_entry_id.as_deref(), Some(entry.entry_id.as_str()));

        let device = hass
            .registries
            .devices
            .get_by_identifier(DOMAIN, &entry.entry_id)
            .unwrap();
        assert_eq!(device.name, "Disney+ Family");
        assert_eq!(registered.device_id.as_deref(), Some(device.id.as_str()));
    }

    #[test]
    fn test_register_is_stable_and_suffixes_collisions() {
        let hass = hass();
        let first = entry("Netflix", json!({}));
        let second = entry("Netflix", json!({}));

        let a = SensorProjection::register(&hass, &first).unwrap();
        let again = SensorProjection::register(&hass, &first).unwrap();
        let b = SensorProjection::register(&hass, &second).unwrap();

        assert_eq!(a.entity_id(SensorKind::Status), again.entity_id(SensorKind::Status));
        assert_eq!(
            b.entity_id(SensorKind::Status).to_string(),
            "sensor.netflix_status_2"
        );
    }

    #[test]
    fn test_refresh_writes_states() {
        let hass = hass();
        let entry = entry("Netflix", json!({"end_date": "2026-10-19", "cost": 9.99}));
        let projection = SensorProjection::register(&hass, &entry).unwrap();
        projection.refresh();

        let days = hass.states.get("sensor.netflix_days_remaining").unwrap();
        assert_eq!(days.state, "3");
        assert_eq!(days.attribute::<String>("unit_of_measurement").as_deref(), Some("days"));
        assert_eq!(days.attribute::<String>("icon").as_deref(), Some("mdi:calendar-clock"));

        let status = hass.states.get("sensor.netflix_status").unwrap();
        assert_eq!(status.state, "expiring_soon");
        assert_eq!(status.attribute::<f64>("cost"), Some(9.99));
        assert_eq!(status.attribute::<String>("end_date").as_deref(), Some("2026-10-19"));
        assert_eq!(status.attribute::<String>("device_class").as_deref(), Some("enum"));
        assert_eq!(
            status.attribute::<Vec<String>>("options").unwrap(),
            ["active", "expiring_soon", "expired"]
        );
        assert!(!status.attributes.contains_key("provider"));
    }

    #[test]
    fn test_no_end_date_is_unknown_and_active() {
        let hass = hass();
        let entry = entry("Gym", json!({"cost": 9.99}));
        let projection = SensorProjection::register(&hass, &entry).unwrap();
        projection.refresh();

        assert_eq!(hass.states.get("sensor.gym_days_remaining").unwrap().state, "unknown");
        let status = hass.states.get("sensor.gym_status").unwrap();
        assert_eq!(status.state, "active");
        assert!(!status.attributes.contains_key("end_date"));

        projection.remove();
        assert!(hass.states.get("sensor.gym_status").is_none());
        assert!(hass.states.get("sensor.gym_days_remaining").is_none());
    }
}
