use sh_config_entries::{ConfigEntries, FlowManager};
use sh_event_bus::EventBus;
use sh_registries::Registries;
use sh_service_registry::ServiceRegistry;
use sh_state_machine::StateMachine;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};

/// The central host instance
pub struct HomeAssistant {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State machine for entity states
    pub states: Arc<StateMachine>,
    /// Service registry for service calls
    pub services: Arc<ServiceRegistry>,
    /// Entity and device registries
    pub registries: Arc<Registries>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: Arc<FlowManager>,
    pub clock: Arc<dyn Clock>,
}

impl HomeAssistant {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::with_event_bus(bus.clone()));
        let registries = Arc::new(Registries::new());
        let config_entries = Arc::new(ConfigEntries::new(registries.clone()));
        let flows = Arc::new(FlowManager::new(config_entries.clone()));

        Self {
            bus,
            states,
            services,
            registries,
            config_entries,
            flows,
            clock,
        }
    }
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}
