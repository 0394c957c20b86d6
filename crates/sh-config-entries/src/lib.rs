//! Config Entries
//!
//! Config entries are the unit of integration configuration. Each one holds
//! the values captured at creation (`data`) and an override store
//! (`options`), and moves through a small setup/unload lifecycle.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntries`] - Manager for all config entries and their lifecycle
//! - [`Schema`] - Field definitions used to validate form input
//! - [`FlowManager`] - Config, options and import flows built on schemas
//!
//! Entries live in memory only.

pub mod entry;
pub mod flow;
pub mod manager;
pub mod schema;
pub mod state_machine;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
pub use flow::{
    FieldDescription, FlowError, FlowManager, FlowResult, FlowResultType, FormField,
    SchemaFlowHandler, ABORT_ALREADY_CONFIGURED, ABORT_INVALID_CONFIG, STEP_INIT, STEP_USER,
};
pub use manager::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, IntegrationHandler, UpdateListener,
};
pub use schema::{describe_errors, FieldError, FieldErrors, NumberMode, Schema, SchemaField, Selector};
pub use state_machine::InvalidTransition;
