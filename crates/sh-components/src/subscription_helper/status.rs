//! Status derivation from the end date

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::consts::EXPIRING_SOON_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    ExpiringSoon,
    Expired,
}

impl SubscriptionStatus {
    /// Every value, in the order sensors advertise them
    pub const ALL: [SubscriptionStatus; 3] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::ExpiringSoon,
        SubscriptionStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::ExpiringSoon => "expiring_soon",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: SubscriptionStatus,
    /// `end_date - today` in whole days; `None` without an end date
    pub days_remaining: Option<i64>,
}

/// Classify a subscription by its end date
pub fn evaluate(end_date: Option<NaiveDate>, today: NaiveDate) -> Evaluation {
    let Some(end_date) = end_date else {
        return Evaluation {
            status: SubscriptionStatus::Active,
            days_remaining: None,
        };
    };

    let days = (end_date - today).num_days();
    let status = if days < 0 {
        SubscriptionStatus::Expired
    } else if days <= EXPIRING_SOON_DAYS {
        SubscriptionStatus::ExpiringSoon
    } else {
        SubscriptionStatus::Active
    };

    Evaluation {
        status,
        days_remaining: Some(days),
    }
}
