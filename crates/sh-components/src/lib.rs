//! Host container and built-in integrations
//!
//! [`HomeAssistant`] wires the event bus, state machine, service registry,
//! registries, config entries and flow manager together. Integrations such
//! as [`subscription_helper`] are registered against it.

mod clock;
mod hass;
pub mod subscription_helper;

pub use clock::{Clock, FixedClock, SystemClock};
pub use hass::HomeAssistant;
