//! Form schemas for the setup, options and import flows

use serde_json::{json, Value};
use sh_config_entries::{Schema, SchemaFlowHandler, Selector};
use std::collections::HashMap;

use super::consts::*;

/// Every field except the name; used by the options flow and `update_options`
pub fn options_schema() -> Schema {
    Schema::new()
        .optional(CONF_COST, Selector::number_box(Some(0.0), None, Some(0.01)))
        .optional(CONF_END_DATE, Selector::date())
        .optional_with_default(
            CONF_RENEWAL_PERIOD,
            json!(DEFAULT_RENEWAL_PERIOD),
            Selector::select(RENEWAL_PERIODS),
        )
        .optional(CONF_PROVIDER, Selector::text())
        .optional_with_default(
            CONF_CANCELLATION_PERIOD,
            json!(DEFAULT_CANCELLATION_PERIOD),
            Selector::number_box(Some(0.0), Some(365.0), Some(1.0)),
        )
        .optional(
            CONF_CONTRACT_LENGTH,
            Selector::number_box(Some(1.0), Some(120.0), Some(1.0)),
        )
        .optional(CONF_PAYMENT_METHOD, Selector::text())
        .optional(CONF_ACCOUNT_NUMBER, Selector::text())
        .optional(CONF_NOTES, Selector::multiline())
}

/// The `user` step: the name plus every option field
pub fn config_schema() -> Schema {
    Schema::new()
        .required(CONF_SUBSCRIPTION_NAME, Selector::text())
        .extend(options_schema())
}

pub struct SubscriptionFlowHandler;

impl SchemaFlowHandler for SubscriptionFlowHandler {
    fn config_schema(&self) -> Schema {
        config_schema()
    }

    fn options_schema(&self) -> Schema {
        options_schema()
    }

    fn entry_title(&self, data: &HashMap<String, Value>) -> Option<String> {
        data.get(CONF_SUBSCRIPTION_NAME)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
    }
}
