//! Constants for the subscription_helper integration

use std::time::Duration;

pub const DOMAIN: &str = "subscription_helper";

pub const CONF_SUBSCRIPTION_NAME: &str = "subscription_name";
pub const CONF_COST: &str = "cost";
pub const CONF_END_DATE: &str = "end_date";
pub const CONF_RENEWAL_PERIOD: &str = "renewal_period";
pub const CONF_PROVIDER: &str = "provider";
pub const CONF_CANCELLATION_PERIOD: &str = "cancellation_period";
pub const CONF_CONTRACT_LENGTH: &str = "contract_length";
pub const CONF_PAYMENT_METHOD: &str = "payment_method";
pub const CONF_ACCOUNT_NUMBER: &str = "account_number";
pub const CONF_NOTES: &str = "notes";

pub const RENEWAL_NONE: &str = "none";
pub const RENEWAL_MONTHLY: &str = "monthly";
pub const RENEWAL_YEARLY: &str = "yearly";
pub const RENEWAL_PERIODS: [&str; 3] = [RENEWAL_NONE, RENEWAL_MONTHLY, RENEWAL_YEARLY];

pub const DEFAULT_RENEWAL_PERIOD: &str = RENEWAL_NONE;
pub const DEFAULT_CANCELLATION_PERIOD: i64 = 30;

/// Inclusive upper bound of the `expiring_soon` window
pub const EXPIRING_SOON_DAYS: i64 = 7;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(3600);

pub const SERVICE_UPDATE_OPTIONS: &str = "update_options";
pub const ATTR_CONFIG_ENTRY_ID: &str = "config_entry_id";
pub const ATTR_ENTITY_ID: &str = "entity_id";
