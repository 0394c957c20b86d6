//! Effective field set of one subscription
//!
//! A config entry keeps the values given at creation in `data` and later
//! edits in `options`. The effective value of a field is the option if set,
//! otherwise the creation value.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use sh_config_entries::ConfigEntry;
use tracing::warn;

use super::consts::*;
use super::status::{evaluate, Evaluation};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub entry_id: String,
    pub name: String,
    pub cost: Option<f64>,
    pub end_date: Option<NaiveDate>,
    pub renewal_period: Option<String>,
    pub provider: Option<String>,
    pub cancellation_period: Option<i64>,
    pub contract_length: Option<i64>,
    pub payment_method: Option<String>,
    pub account_number: Option<String>,
    pub notes: Option<String>,
}

/// Side attributes of the status sensor; absent fields are omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewal_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The option if the key is there, else the creation value
///
/// Null and blank text count as unset. A blank option still shadows the
/// creation value, which is how a field gets cleared.
fn effective<'a>(entry: &'a ConfigEntry, key: &str) -> Option<&'a Value> {
    let present = |v: &&Value| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    };
    match entry.options.get(key) {
        Some(option) => Some(option).filter(present),
        None => entry.data.get(key).filter(present),
    }
}

fn text(entry: &ConfigEntry, key: &str) -> Option<String> {
    match effective(entry, key)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn number(entry: &ConfigEntry, key: &str) -> Option<f64> {
    match effective(entry, key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(entry: &ConfigEntry, key: &str) -> Option<i64> {
    number(entry, key)
        .filter(|n| n.fract() == 0.0)
        .map(|n| n as i64)
}

fn date(entry: &ConfigEntry, key: &str) -> Option<NaiveDate> {
    let raw = text(entry, key)?;
    match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(err) => {
            warn!(
                "Ignoring unparsable {} '{}' on entry {}: {}",
                key, raw, entry.entry_id, err
            );
            None
        }
    }
}

impl SubscriptionRecord {
    pub fn from_entry(entry: &ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            name: entry.title.clone(),
            cost: number(entry, CONF_COST),
            end_date: date(entry, CONF_END_DATE),
            renewal_period: text(entry, CONF_RENEWAL_PERIOD),
            provider: text(entry, CONF_PROVIDER),
            cancellation_period: integer(entry, CONF_CANCELLATION_PERIOD),
            contract_length: integer(entry, CONF_CONTRACT_LENGTH),
            payment_method: text(entry, CONF_PAYMENT_METHOD),
            account_number: text(entry, CONF_ACCOUNT_NUMBER),
            notes: text(entry, CONF_NOTES),
        }
    }

    pub fn evaluate(&self, today: NaiveDate) -> Evaluation {
        evaluate(self.end_date, today)
    }

    pub fn attributes(&self) -> SubscriptionAttributes {
        SubscriptionAttributes {
            end_date: self.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
            cost: self.cost,
            renewal_period: self.renewal_period.clone(),
            provider: self.provider.clone(),
            cancellation_period: self.cancellation_period,
            contract_length: self.contract_length,
            payment_method: self.payment_method.clone(),
            account_number: self.account_number.clone(),
            notes: self.notes.clone(),
        }
    }
}
