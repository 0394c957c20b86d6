//! End-to-end tests of the subscription_helper integration against the host

use chrono::{Duration as Days, NaiveDate};
use serde_json::{json, Map, Value};
use sh_components::subscription_helper::{
    self, consts::*, update_options, SubscriptionHelper, UpdateOptionsError,
};
use sh_components::{FixedClock, HomeAssistant};
use sh_config::{SubscriptionHelperConfig, TargetResolution};
use sh_config_entries::{ConfigEntry, ConfigEntryState, FlowResultType};
use sh_core::{events::STATE_CHANGED, Context};
use sh_registries::EntityRegistration;
use sh_service_registry::ServiceError;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn in_days(days: i64) -> String {
    (today() + Days::days(days)).format("%Y-%m-%d").to_string()
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

struct Harness {
    hass: Arc<HomeAssistant>,
    clock: Arc<FixedClock>,
    helper: Arc<SubscriptionHelper>,
}

fn harness_with(config: SubscriptionHelperConfig) -> Harness {
    let clock = Arc::new(FixedClock::new(today()));
    let hass = Arc::new(HomeAssistant::with_clock(clock.clone()));
    let helper = subscription_helper::register(&hass, &config);
    Harness { hass, clock, helper }
}

fn harness() -> Harness {
    harness_with(SubscriptionHelperConfig::default())
}

impl Harness {
    /// Create an entry through the import flow and return its id
    async fn add(&self, input: Value) -> String {
        let result = self.hass.flows.import(DOMAIN, &object(input)).await.unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        result.result.unwrap()["entry_id"].as_str().unwrap().to_string()
    }

    fn state(&self, entity_id: &str) -> Option<String> {
        self.hass.states.get(entity_id).map(|s| s.state)
    }

    async fn call(&self, data: Value) -> Result<(), ServiceError> {
        self.hass
            .services
            .call(DOMAIN, SERVICE_UPDATE_OPTIONS, data, Context::new())
            .await
    }

    fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.hass.config_entries.get(entry_id).unwrap()
    }
}

// ============================================================================
// Sensor projection
// ============================================================================

#[tokio::test]
async fn test_expiring_soon_scenario() {
    let h = harness();
    let entry_id = h
        .add(json!({"subscription_name": "Netflix", "end_date": in_days(3)}))
        .await;

    assert_eq!(h.entry(&entry_id).state, ConfigEntryState::Loaded);
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("3"));
    assert_eq!(h.state("sensor.netflix_status").as_deref(), Some("expiring_soon"));
}

#[tokio::test]
async fn test_expired_scenario() {
    let h = harness();
    h.add(json!({"subscription_name": "Hulu", "end_date": in_days(-1)}))
        .await;

    assert_eq!(h.state("sensor.hulu_days_remaining").as_deref(), Some("-1"));
    assert_eq!(h.state("sensor.hulu_status").as_deref(), Some("expired"));
}

#[tokio::test]
async fn test_threshold_boundaries() {
    let h = harness();
    h.add(json!({"subscription_name": "Seven", "end_date": in_days(7)}))
        .await;
    h.add(json!({"subscription_name": "Eight", "end_date": in_days(8)}))
        .await;

    assert_eq!(h.state("sensor.seven_status").as_deref(), Some("expiring_soon"));
    assert_eq!(h.state("sensor.eight_status").as_deref(), Some("active"));
}

#[tokio::test]
async fn test_no_end_date_scenario() {
    let h = harness();
    h.add(json!({"subscription_name": "Gym", "cost": 9.99})).await;

    assert_eq!(h.state("sensor.gym_days_remaining").as_deref(), Some("unknown"));

    let status = h.hass.states.get("sensor.gym_status").unwrap();
    assert_eq!(status.state, "active");
    assert_eq!(status.attribute::<f64>("cost"), Some(9.99));
    assert!(!status.attributes.contains_key("end_date"));
    // Defaults from the setup form are present
    assert_eq!(status.attribute::<String>("renewal_period").as_deref(), Some("none"));
    assert_eq!(status.attribute::<i64>("cancellation_period"), Some(30));
}

#[tokio::test(start_paused = true)]
async fn test_hourly_refresh_follows_clock() {
    let h = harness();
    h.add(json!({"subscription_name": "Netflix", "end_date": in_days(8)}))
        .await;
    assert_eq!(h.state("sensor.netflix_status").as_deref(), Some("active"));

    h.clock.set(today() + Days::days(1));
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("8"));

    tokio::time::sleep(Duration::from_secs(31 * 60)).await;
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("7"));
    assert_eq!(h.state("sensor.netflix_status").as_deref(), Some("expiring_soon"));
}

#[tokio::test(start_paused = true)]
async fn test_zero_update_interval_still_refreshes() {
    let h = harness_with(SubscriptionHelperConfig {
        update_interval: 0,
        ..SubscriptionHelperConfig::default()
    });
    h.add(json!({"subscription_name": "Netflix", "end_date": in_days(8)}))
        .await;

    h.clock.set(today() + Days::days(1));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("7"));
}

// ============================================================================
// update_options
// ============================================================================

#[tokio::test]
async fn test_update_by_entry_id_reloads_sensors() {
    let h = harness();
    let entry_id = h
        .add(json!({
            "subscription_name": "Netflix",
            "cost": 9.99,
            "provider": "Netflix Inc",
            "notes": "family plan",
            "end_date": in_days(30),
        }))
        .await;

    let mut events = h.hass.bus.subscribe(STATE_CHANGED);

    h.call(json!({
        "config_entry_id": entry_id,
        "cost": 12.99,
        "end_date": in_days(2),
    }))
    .await
    .unwrap();

    let entry = h.entry(&entry_id);
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(entry.options["cost"], json!(12.99));
    assert_eq!(entry.options["end_date"], json!(in_days(2)));
    // Untouched fields keep their creation values
    assert_eq!(entry.options["provider"], json!("Netflix Inc"));
    assert_eq!(entry.options["notes"], json!("family plan"));

    let status = h.hass.states.get("sensor.netflix_status").unwrap();
    assert_eq!(status.state, "expiring_soon");
    assert_eq!(status.attribute::<f64>("cost"), Some(12.99));
    assert_eq!(status.attribute::<String>("provider").as_deref(), Some("Netflix Inc"));
    assert_eq!(status.attribute::<String>("notes").as_deref(), Some("family plan"));
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("2"));

    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn test_update_by_entity_id() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Spotify"})).await;

    assert_ok!(
        h.call(json!({"entity_id": "sensor.spotify_status", "provider": "Spotify AB"}))
            .await
    );

    assert_eq!(h.entry(&entry_id).options["provider"], json!("Spotify AB"));
    let status = h.hass.states.get("sensor.spotify_status").unwrap();
    assert_eq!(status.attribute::<String>("provider").as_deref(), Some("Spotify AB"));
}

#[tokio::test]
async fn test_config_entry_id_wins_over_entity_id() {
    let h = harness();
    let first = h.add(json!({"subscription_name": "First"})).await;
    let second = h.add(json!({"subscription_name": "Second"})).await;

    h.call(json!({
        "config_entry_id": second,
        "entity_id": "sensor.first_status",
        "notes": "picked",
    }))
    .await
    .unwrap();

    assert!(!h.entry(&first).options.contains_key("notes"));
    assert_eq!(h.entry(&second).options["notes"], json!("picked"));
}

#[tokio::test]
async fn test_empty_patch_leaves_entry_unchanged() {
    let h = harness();
    let entry_id = h
        .add(json!({"subscription_name": "Netflix", "cost": 9.99}))
        .await;
    let before = h.entry(&entry_id);

    h.call(json!({"config_entry_id": entry_id})).await.unwrap();

    let after = h.entry(&entry_id);
    assert_eq!(after.data, before.data);
    assert_eq!(after.options, before.options);
    assert_eq!(after.modified_at, before.modified_at);
}

#[tokio::test]
async fn test_partial_merge_keeps_previous_options() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;

    h.call(json!({"config_entry_id": entry_id, "provider": "Netflix Inc", "notes": "a"}))
        .await
        .unwrap();
    h.call(json!({"config_entry_id": entry_id, "cost": 5}))
        .await
        .unwrap();

    let options = h.entry(&entry_id).options;
    assert_eq!(options["provider"], json!("Netflix Inc"));
    assert_eq!(options["notes"], json!("a"));
    assert_eq!(options["cost"], json!(5.0));
}

#[tokio::test]
async fn test_date_is_normalized() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;

    h.call(json!({"config_entry_id": entry_id, "end_date": " 2026-11-01 "}))
        .await
        .unwrap();

    assert_eq!(h.entry(&entry_id).options["end_date"], json!("2026-11-01"));
}

#[tokio::test]
async fn test_target_not_resolved() {
    let h = harness();
    h.add(json!({"subscription_name": "Netflix"})).await;

    for data in [
        json!({}),
        json!({"cost": 1}),
        json!({"entity_id": "sensor.does_not_exist"}),
        json!({"config_entry_id": ""}),
    ] {
        let result = update_options(&h.hass, TargetResolution::EntryOrEntity, &object(data)).await;
        assert_eq!(result, Err(UpdateOptionsError::TargetNotResolved));
    }
}

#[tokio::test]
async fn test_entry_id_only_policy_rejects_entity_id() {
    let h = harness_with(SubscriptionHelperConfig {
        target_resolution: TargetResolution::EntryIdOnly,
        ..Default::default()
    });
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;

    let err = assert_err!(
        h.call(json!({"entity_id": "sensor.netflix_status", "cost": 3}))
            .await
    );
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(
        update_options(
            &h.hass,
            TargetResolution::EntryIdOnly,
            &object(json!({"entity_id": "sensor.netflix_status"}))
        )
        .await,
        Err(UpdateOptionsError::TargetNotResolved)
    );

    h.call(json!({"config_entry_id": entry_id, "cost": 3}))
        .await
        .unwrap();
    assert_eq!(h.entry(&entry_id).options["cost"], json!(3.0));
}

#[tokio::test]
async fn test_record_not_found() {
    let h = harness();
    h.add(json!({"subscription_name": "Netflix"})).await;

    let result = update_options(
        &h.hass,
        TargetResolution::EntryOrEntity,
        &object(json!({"config_entry_id": "01NOPE"})),
    )
    .await;
    assert_eq!(result, Err(UpdateOptionsError::RecordNotFound("01NOPE".to_string())));
}

#[tokio::test]
async fn test_wrong_record_kind() {
    let h = harness();
    h.add(json!({"subscription_name": "Netflix"})).await;

    let other = h
        .hass
        .config_entries
        .add(ConfigEntry::new("weather", "Home"))
        .unwrap();
    h.hass.registries.entities.get_or_create(EntityRegistration {
        domain: "sensor",
        platform: "weather",
        unique_id: "home_temperature",
        suggested_object_id: "home_temperature",
        config_entry_id: Some(&other.entry_id),
        device_id: None,
    });

    let data = object(json!({"entity_id": "sensor.home_temperature", "cost": 1}));
    let result = update_options(&h.hass, TargetResolution::EntryOrEntity, &data).await;
    assert!(matches!(
        result,
        Err(UpdateOptionsError::WrongRecordKind { ref domain, .. }) if domain == "weather"
    ));

    // Target checks come before field validation
    let data = object(json!({"config_entry_id": other.entry_id, "cost": -5}));
    let result = update_options(&h.hass, TargetResolution::EntryOrEntity, &data).await;
    assert!(matches!(result, Err(UpdateOptionsError::WrongRecordKind { .. })));
}

#[tokio::test]
async fn test_validation_errors_leave_entry_untouched() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;
    let before = h.entry(&entry_id).options;

    for patch in [
        json!({"renewal_period": "weekly"}),
        json!({"cost": -1}),
        json!({"cost": "cheap"}),
        json!({"cancellation_period": 366}),
        json!({"contract_length": 0}),
        json!({"contract_length": 6.5}),
        json!({"end_date": "31/12/2026"}),
        json!({"subscription_name": "Renamed"}),
    ] {
        let mut data = object(patch.clone());
        data.insert("config_entry_id".to_string(), json!(entry_id));

        let result = update_options(&h.hass, TargetResolution::EntryOrEntity, &data).await;
        assert!(
            matches!(result, Err(UpdateOptionsError::Validation(_))),
            "patch {} was accepted",
            patch
        );
    }

    assert_eq!(h.entry(&entry_id).options, before);
    assert_eq!(h.entry(&entry_id).title, "Netflix");
}

#[tokio::test]
async fn test_blank_value_clears_creation_field() {
    let h = harness();
    let entry_id = h
        .add(json!({
            "subscription_name": "Netflix",
            "notes": "family plan",
            "end_date": in_days(3),
        }))
        .await;
    assert_eq!(h.state("sensor.netflix_status").as_deref(), Some("expiring_soon"));

    assert_ok!(
        h.call(json!({"config_entry_id": entry_id, "notes": "", "end_date": null}))
            .await
    );

    let entry = h.entry(&entry_id);
    assert!(!entry.options.contains_key("notes"));
    assert!(!entry.options.contains_key("end_date"));
    let status = h.hass.states.get("sensor.netflix_status").unwrap();
    assert_eq!(status.state, "active");
    assert!(!status.attributes.contains_key("notes"));
    assert!(!status.attributes.contains_key("end_date"));
    assert_eq!(h.state("sensor.netflix_days_remaining").as_deref(), Some("unknown"));
}

#[tokio::test]
async fn test_service_error_message() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;

    let err = h
        .call(json!({"config_entry_id": entry_id, "renewal_period": "weekly"}))
        .await
        .unwrap_err();
    match err {
        ServiceError::Validation(message) => assert!(message.contains("renewal_period")),
        other => panic!("unexpected error: {:?}", other),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_service_lives_while_any_entry_is_loaded() {
    let h = harness();
    assert!(!h.hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS));

    let first = h.add(json!({"subscription_name": "First"})).await;
    let second = h.add(json!({"subscription_name": "Second"})).await;
    assert!(h.hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS));
    assert_eq!(h.helper.loaded_count(), 2);

    h.hass.config_entries.unload(&first).await.unwrap();
    assert!(h.hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS));
    assert!(h.state("sensor.first_status").is_none());
    assert!(h.state("sensor.second_status").is_some());

    h.hass.config_entries.unload(&second).await.unwrap();
    assert!(!h.hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS));
    assert_eq!(h.helper.loaded_count(), 0);
}

#[tokio::test]
async fn test_reload_keeps_entity_ids() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;
    h.add(json!({"subscription_name": "Netflix Kids"})).await;

    h.hass.config_entries.reload(&entry_id).await.unwrap();

    assert!(h.state("sensor.netflix_status").is_some());
    assert!(h.state("sensor.netflix_kids_status").is_some());
    assert!(h.state("sensor.netflix_status_2").is_none());
}

#[tokio::test]
async fn test_remove_entry_clears_everything() {
    let h = harness();
    let entry_id = h.add(json!({"subscription_name": "Netflix"})).await;
    assert_eq!(
        h.hass.registries.entities.get_by_config_entry_id(&entry_id).len(),
        2
    );

    h.hass.config_entries.remove(&entry_id).await.unwrap();

    assert!(h.hass.config_entries.get(&entry_id).is_none());
    assert!(h.state("sensor.netflix_status").is_none());
    assert!(h.state("sensor.netflix_days_remaining").is_none());
    assert!(h.hass.registries.entities.get_by_config_entry_id(&entry_id).is_empty());
    assert!(h.hass.registries.devices.get_by_identifier(DOMAIN, &entry_id).is_none());
    assert!(!h.hass.services.has_service(DOMAIN, SERVICE_UPDATE_OPTIONS));
}

// ============================================================================
// Flows
// ============================================================================

#[tokio::test]
async fn test_config_flow_round() {
    let h = harness();
    let form = h.hass.flows.start_config_flow(DOMAIN).unwrap();
    assert_eq!(form.result_type, FlowResultType::Form);
    assert_eq!(form.step_id.as_deref(), Some("user"));
    assert_eq!(form.data_schema[0].name, CONF_SUBSCRIPTION_NAME);

    let again = h
        .hass
        .flows
        .progress(&form.flow_id, json!({"subscription_name": "Netflix", "cost": "abc"}))
        .await
        .unwrap();
    assert_eq!(again.result_type, FlowResultType::Form);
    assert_eq!(again.errors.unwrap()["cost"], "invalid_number");

    let done = h
        .hass
        .flows
        .progress(&form.flow_id, json!({"subscription_name": "Netflix", "cost": 7}))
        .await
        .unwrap();
    assert_eq!(done.result_type, FlowResultType::CreateEntry);
    assert_eq!(done.title.as_deref(), Some("Netflix"));
    assert_eq!(h.state("sensor.netflix_status").as_deref(), Some("active"));
}

#[tokio::test]
async fn test_options_flow_replaces_options_and_reloads() {
    let h = harness();
    let entry_id = h
        .add(json!({"subscription_name": "Netflix", "cost": 9.99, "end_date": in_days(30)}))
        .await;
    h.call(json!({"config_entry_id": entry_id, "notes": "old note"}))
        .await
        .unwrap();

    let form = h.hass.flows.start_options_flow(&entry_id).unwrap();
    assert_eq!(form.step_id.as_deref(), Some("init"));
    let cost_field = form
        .data_schema
        .iter()
        .find(|f| f.name == CONF_COST)
        .unwrap();
    assert_eq!(
        cost_field.description.as_ref().unwrap().suggested_value,
        json!(9.99)
    );

    let done = h
        .hass
        .flows
        .progress(&form.flow_id, json!({"cost": 11, "end_date": in_days(5)}))
        .await
        .unwrap();
    assert_eq!(done.result_type, FlowResultType::CreateEntry);

    let options = h.entry(&entry_id).options;
    assert_eq!(options["cost"], json!(11.0));
    assert!(!options.contains_key("notes"));

    // The note only ever lived in options, so it is gone after the replace
    let status = h.hass.states.get("sensor.netflix_status").unwrap();
    assert_eq!(status.state, "expiring_soon");
    assert_eq!(status.attribute::<f64>("cost"), Some(11.0));
    assert!(!status.attributes.contains_key("notes"));
}

#[tokio::test]
async fn test_options_flow_clears_omitted_creation_fields() {
    let h = harness();
    let entry_id = h
        .add(json!({
            "subscription_name": "Netflix",
            "notes": "family plan",
            "end_date": in_days(3),
        }))
        .await;

    let form = h.hass.flows.start_options_flow(&entry_id).unwrap();
    let done = h.hass.flows.progress(&form.flow_id, json!({})).await.unwrap();
    assert_eq!(done.result_type, FlowResultType::CreateEntry);

    let entry = h.entry(&entry_id);
    assert_eq!(entry.options[CONF_RENEWAL_PERIOD], json!("none"));
    assert_eq!(entry.options[CONF_CANCELLATION_PERIOD], json!(30));
    assert!(!entry.options.contains_key("notes"));

    let status = h.hass.states.get("sensor.netflix_status").unwrap();
    assert_eq!(status.state, "active");
    assert!(!status.attributes.contains_key("notes"));
    assert!(!status.attributes.contains_key("end_date"));
}

#[tokio::test]
async fn test_import_skips_duplicates_and_invalid() {
    let h = harness();
    let declared = vec![
        object(json!({"subscription_name": "Netflix", "end_date": "2026-12-01"})),
        object(json!({"subscription_name": "Netflix"})),
        object(json!({"subscription_name": "Broken", "renewal_period": "weekly"})),
        object(json!({"cost": 3})),
    ];

    let created = subscription_helper::import_subscriptions(&h.hass, &declared).await;
    assert_eq!(created, 1);
    assert_eq!(h.hass.config_entries.get_by_domain(DOMAIN).len(), 1);

    // A second start imports nothing new
    let created = subscription_helper::import_subscriptions(&h.hass, &declared).await;
    assert_eq!(created, 0);
}
