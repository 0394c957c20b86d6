//! Core types for the subscription helper host
//!
//! The host is the small slice of a home-automation core that the
//! `subscription_helper` integration runs against. This crate holds the
//! value types shared by every other crate: entity ids, states, events,
//! contexts, service calls and listener handles.

mod context;
mod entity_id;
mod event;
mod listener;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use listener::ListenerHandle;
pub use service_call::ServiceCall;
pub use state::State;

/// State value published when an entity has no value
pub const STATE_UNKNOWN: &str = "unknown";

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Fired whenever an entity state is written or removed
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired when a service is registered
    pub const SERVICE_REGISTERED: &str = "service_registered";

    /// Fired when a service is removed
    pub const SERVICE_REMOVED: &str = "service_removed";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for SERVICE_REGISTERED and SERVICE_REMOVED events
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct ServiceEventData {
        pub domain: String,
        pub service: String,
    }
}
