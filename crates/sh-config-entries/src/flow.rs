//! Config and options flows
//!
//! Flows here are single-step forms driven by a [`Schema`]. A config flow
//! (`user` step) creates an entry, an options flow (`init` step) replaces an
//! entry's options, and an import creates an entry from YAML without a form.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};
use crate::schema::{FieldErrors, Schema, Selector};

pub const STEP_USER: &str = "user";
pub const STEP_INIT: &str = "init";

pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
pub const ABORT_INVALID_CONFIG: &str = "invalid_config";

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("No flow handler for {0}")]
    UnknownHandler(String),

    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("Config entry not found: {0}")]
    UnknownEntry(String),

    #[error("Invalid user input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Result of a flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain, or the entry id for options flows
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty unless this is a form
    pub data_schema: Vec<FormField>,
    /// Error code per field from the previous submission
    pub errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The created entry, or the new options for an options flow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub last_step: Option<bool>,
}

impl FlowResult {
    fn abort(flow_id: String, handler: &str, reason: &str) -> Self {
        Self {
            flow_id,
            handler: handler.to_string(),
            result_type: FlowResultType::Abort,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            title: None,
            reason: Some(reason.to_string()),
            result: None,
            last_step: None,
        }
    }

    fn create_entry(flow_id: String, handler: &str, title: Option<String>, result: Value) -> Self {
        Self {
            flow_id,
            handler: handler.to_string(),
            result_type: FlowResultType::CreateEntry,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            title,
            reason: None,
            result: Some(result),
            last_step: None,
        }
    }
}

/// One form field as served to clients
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    pub name: String,
    pub required: bool,
    pub selector: Selector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<FieldDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDescription {
    pub suggested_value: Value,
}

fn form_fields(schema: &Schema, suggested: &HashMap<String, Value>) -> Vec<FormField> {
    schema
        .fields()
        .iter()
        .map(|field| FormField {
            name: field.key.clone(),
            required: field.required,
            selector: field.selector.clone(),
            default: field.default.clone(),
            description: suggested.get(&field.key).map(|v| FieldDescription {
                suggested_value: v.clone(),
            }),
        })
        .collect()
}

/// Schemas and titles for one integration's flows
pub trait SchemaFlowHandler: Send + Sync {
    /// Fields of the `user` step
    fn config_schema(&self) -> Schema;

    /// Fields of the options `init` step
    fn options_schema(&self) -> Schema;

    /// Title for an entry created from validated config data
    fn entry_title(&self, data: &HashMap<String, Value>) -> Option<String>;

    /// Values pre-filled in the options form
    fn suggested_options(&self, entry: &ConfigEntry) -> HashMap<String, Value> {
        let mut values = entry.data.clone();
        values.extend(entry.options.clone());
        values
    }
}

#[derive(Debug, Clone)]
enum FlowKind {
    Config,
    Options { entry_id: String },
}

#[derive(Debug, Clone)]
struct FlowProgress {
    flow_id: String,
    domain: String,
    kind: FlowKind,
}

pub struct FlowManager {
    config_entries: Arc<ConfigEntries>,
    handlers: DashMap<String, Arc<dyn SchemaFlowHandler>>,
    flows: DashMap<String, FlowProgress>,
}

impl FlowManager {
    pub fn new(config_entries: Arc<ConfigEntries>) -> Self {
        Self {
            config_entries,
            handlers: DashMap::new(),
            flows: DashMap::new(),
        }
    }

    pub fn register_handler(&self, domain: &str, handler: Arc<dyn SchemaFlowHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered flow handler for domain: {}", domain);
    }

    fn handler(&self, domain: &str) -> Result<Arc<dyn SchemaFlowHandler>, FlowError> {
        self.handlers
            .get(domain)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))
    }

    fn progress_of(&self, flow_id: &str) -> Result<FlowProgress, FlowError> {
        self.flows
            .get(flow_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    fn show_form(
        &self,
        progress: &FlowProgress,
        errors: Option<&FieldErrors>,
    ) -> Result<FlowResult, FlowError> {
        let handler = self.handler(&progress.domain)?;

        let (schema, step_id, handler_id, suggested) = match &progress.kind {
            FlowKind::Config => (
                handler.config_schema(),
                STEP_USER,
                progress.domain.clone(),
                HashMap::new(),
            ),
            FlowKind::Options { entry_id } => {
                let entry = self
                    .config_entries
                    .get(entry_id)
                    .ok_or_else(|| FlowError::UnknownEntry(entry_id.clone()))?;
                (
                    handler.options_schema(),
                    STEP_INIT,
                    entry_id.clone(),
                    handler.suggested_options(&entry),
                )
            }
        };

        Ok(FlowResult {
            flow_id: progress.flow_id.clone(),
            handler: handler_id,
            result_type: FlowResultType::Form,
            step_id: Some(step_id.to_string()),
            data_schema: form_fields(&schema, &suggested),
            errors: errors.map(|errors| {
                errors
                    .iter()
                    .map(|(k, e)| (k.clone(), e.code().to_string()))
                    .collect()
            }),
            title: None,
            reason: None,
            result: None,
            last_step: Some(true),
        })
    }

    fn begin(&self, domain: &str, kind: FlowKind) -> Result<FlowResult, FlowError> {
        let progress = FlowProgress {
            flow_id: ulid::Ulid::new().to_string(),
            domain: domain.to_string(),
            kind,
        };
        let result = self.show_form(&progress, None)?;
        debug!(flow_id = %progress.flow_id, domain = %domain, "Started flow");
        self.flows.insert(progress.flow_id.clone(), progress);
        Ok(result)
    }

    pub fn start_config_flow(&self, domain: &str) -> Result<FlowResult, FlowError> {
        self.handler(domain)?;
        self.begin(domain, FlowKind::Config)
    }

    pub fn start_options_flow(&self, entry_id: &str) -> Result<FlowResult, FlowError> {
        let entry = self
            .config_entries
            .get(entry_id)
            .ok_or_else(|| FlowError::UnknownEntry(entry_id.to_string()))?;
        self.handler(&entry.domain)?;
        self.begin(
            &entry.domain,
            FlowKind::Options {
                entry_id: entry_id.to_string(),
            },
        )
    }

    /// Current form of a flow in progress
    pub fn get(&self, flow_id: &str) -> Result<FlowResult, FlowError> {
        let progress = self.progress_of(flow_id)?;
        self.show_form(&progress, None)
    }

    /// Submit input to a flow
    ///
    /// Invalid input shows the form again with per-field errors; valid input
    /// finishes the flow.
    pub async fn progress(&self, flow_id: &str, user_input: Value) -> Result<FlowResult, FlowError> {
        let progress = self.progress_of(flow_id)?;
        let input = user_input
            .as_object()
            .ok_or_else(|| FlowError::InvalidInput("expected an object".to_string()))?;

        let handler = self.handler(&progress.domain)?;
        let schema = match progress.kind {
            FlowKind::Config => handler.config_schema(),
            FlowKind::Options { .. } => handler.options_schema(),
        };

        let data = match schema.validate(input) {
            Ok(data) => data,
            Err(errors) => {
                debug!(flow_id = %flow_id, errors = ?errors, "Flow input rejected");
                return self.show_form(&progress, Some(&errors));
            }
        };

        self.flows.remove(flow_id);

        match progress.kind {
            FlowKind::Config => {
                self.create_entry(
                    progress.flow_id,
                    &progress.domain,
                    handler.as_ref(),
                    data,
                    ConfigEntrySource::User,
                )
                .await
            }
            FlowKind::Options { entry_id } => {
                let result = serde_json::to_value(&data).unwrap_or_default();
                self.config_entries
                    .update(&entry_id, ConfigEntryUpdate::new().options(data))
                    .await?;
                info!("Options updated for entry {}", entry_id);
                Ok(FlowResult::create_entry(
                    progress.flow_id,
                    &entry_id,
                    None,
                    result,
                ))
            }
        }
    }

    pub fn abort(&self, flow_id: &str) -> Result<(), FlowError> {
        self.flows
            .remove(flow_id)
            .map(|_| debug!(flow_id = %flow_id, "Flow aborted"))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    pub fn in_progress(&self) -> usize {
        self.flows.len()
    }

    /// Create an entry from configuration-file data, skipping the form
    ///
    /// Aborts with `already_configured` when an entry with the same title exists.
    pub async fn import(&self, domain: &str, input: &Map<String, Value>) -> Result<FlowResult, FlowError> {
        let handler = self.handler(domain)?;
        let flow_id = ulid::Ulid::new().to_string();

        let data = match handler.config_schema().validate(input) {
            Ok(data) => data,
            Err(errors) => {
                warn!(
                    domain = %domain,
                    "Rejected imported configuration: {}",
                    crate::schema::describe_errors(&errors)
                );
                let mut result = FlowResult::abort(flow_id, domain, ABORT_INVALID_CONFIG);
                result.errors = Some(
                    errors
                        .iter()
                        .map(|(k, e)| (k.clone(), e.code().to_string()))
                        .collect(),
                );
                return Ok(result);
            }
        };

        let title = handler.entry_title(&data).unwrap_or_else(|| domain.to_string());
        if self
            .config_entries
            .get_by_domain(domain)
            .iter()
            .any(|e| e.title == title)
        {
            debug!(domain = %domain, title = %title, "Import already configured");
            return Ok(FlowResult::abort(flow_id, domain, ABORT_ALREADY_CONFIGURED));
        }

        self.create_entry(flow_id, domain, handler.as_ref(), data, ConfigEntrySource::Import)
            .await
    }

    async fn create_entry(
        &self,
        flow_id: String,
        domain: &str,
        handler: &dyn SchemaFlowHandler,
        data: HashMap<String, Value>,
        source: ConfigEntrySource,
    ) -> Result<FlowResult, FlowError> {
        let title = handler.entry_title(&data).unwrap_or_else(|| domain.to_string());

        // Anything the options form edits is stored as an option, so the
        // options flow can later change or clear it
        let editable = handler.options_schema();
        let (options, data): (HashMap<_, _>, HashMap<_, _>) = data
            .into_iter()
            .partition(|(key, _)| editable.field(key).is_some());

        let entry = self.config_entries.add(
            ConfigEntry::new(domain, title.clone())
                .with_data(data)
                .with_options(options)
                .with_source(source),
        )?;

        // A failed setup leaves the entry in place, in the setup_error state
        if let Err(err) = self.config_entries.setup(&entry.entry_id).await {
            warn!("Setup of new entry {} failed: {}", entry.entry_id, err);
        }

        let entry = self.config_entries.get(&entry.entry_id).unwrap_or(entry);
        let result = serde_json::to_value(&entry).unwrap_or_default();
        Ok(FlowResult::create_entry(flow_id, domain, Some(title), result))
    }
}
