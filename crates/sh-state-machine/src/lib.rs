//! Entity state store
//!
//! Holds the current published value of every entity, indexed by domain.
//! Each write or removal fires `state_changed` on the event bus.

use dashmap::DashMap;
use sh_core::events::StateChangedData;
use sh_core::{Context, EntityId, State};
use sh_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

pub struct StateMachine {
    /// Keyed by entity id string
    states: DashMap<String, State>,
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Write an entity's state and fire `state_changed`
    ///
    /// `last_changed` is carried over when only the attributes differ.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map_or(true, |s| s.state != new_state.state),
            "Setting entity state"
        );

        self.states.insert(key.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Drop an entity's state; fires `state_changed` with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let old_state = self.states.remove(&key).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &key);
            }

            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

pub type SharedStateMachine = Arc<StateMachine>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<EventBus>, StateMachine) {
        let bus = Arc::new(EventBus::new());
        let sm = StateMachine::new(bus.clone());
        (bus, sm)
    }

    fn sensor(object_id: &str) -> EntityId {
        EntityId::new("sensor", object_id).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let (_, sm) = setup();
        let attrs = HashMap::from([("provider".to_string(), json!("Netflix"))]);

        let state = sm.set(sensor("netflix_status"), "active", attrs.clone(), Context::new());
        assert_eq!(state.state, "active");
        assert_eq!(state.attributes, attrs);

        let fetched = sm.get("sensor.netflix_status").unwrap();
        assert_eq!(fetched.attribute::<String>("provider").as_deref(), Some("Netflix"));
        assert_eq!(sm.entity_count(), 1);
    }

    #[test]
    fn test_domain_index() {
        let (_, sm) = setup();
        sm.set(sensor("a_days_remaining"), "3", HashMap::new(), Context::new());
        sm.set(sensor("a_status"), "expiring_soon", HashMap::new(), Context::new());
        sm.set(
            EntityId::new("binary_sensor", "other").unwrap(),
            "on",
            HashMap::new(),
            Context::new(),
        );

        assert_eq!(sm.entity_ids("sensor").len(), 2);
        assert_eq!(sm.domain_states("binary_sensor").len(), 1);
        assert_eq!(sm.all().len(), 3);
    }

    #[test]
    fn test_rewrite_same_value_keeps_last_changed() {
        let (_, sm) = setup();
        let first = sm.set(sensor("x_days_remaining"), "10", HashMap::new(), Context::new());
        std::thread::sleep(std::time::Duration::from_millis(5));

        let same = sm.set(sensor("x_days_remaining"), "10", HashMap::new(), Context::new());
        assert_eq!(first.last_changed, same.last_changed);
        assert!(same.last_updated > first.last_updated);

        let moved = sm.set(sensor("x_days_remaining"), "9", HashMap::new(), Context::new());
        assert!(moved.last_changed > same.last_changed);
    }

    #[test]
    fn test_remove() {
        let (_, sm) = setup();
        let id = sensor("gone_status");
        sm.set(id.clone(), "expired", HashMap::new(), Context::new());

        let removed = sm.remove(&id, Context::new()).unwrap();
        assert_eq!(removed.state, "expired");
        assert!(sm.get("sensor.gone_status").is_none());
        assert!(sm.entity_ids("sensor").is_empty());
        assert!(sm.remove(&id, Context::new()).is_none());
    }

    #[tokio::test]
    async fn test_state_changed_events() {
        let (bus, sm) = setup();
        let mut rx = bus.subscribe_typed::<StateChangedData>();
        let id = sensor("hulu_status");

        sm.set(id.clone(), "active", HashMap::new(), Context::new());
        let event = rx.recv().await.unwrap();
        assert!(event.data.old_state.is_none());
        assert_eq!(event.data.new_state.unwrap().state, "active");

        sm.remove(&id, Context::new());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.old_state.unwrap().state, "active");
        assert!(event.data.new_state.is_none());
    }
}
