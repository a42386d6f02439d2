use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::entitlements::Plan;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    Canceled,
    PastDue,
    #[default]
    #[serde(rename = "none")]
    NoSubscription,
}

impl BillingStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => BillingStatus::Active,
            "canceled" => BillingStatus::Canceled,
            "past_due" => BillingStatus::PastDue,
            _ => BillingStatus::NoSubscription,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BillingStatus::Active => "active",
            BillingStatus::Canceled => "canceled",
            BillingStatus::PastDue => "past_due",
            BillingStatus::NoSubscription => "none",
        }
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription state as served by `GET /api/billing/status`.
///
/// `Default` is the safe fallback used when nothing is known: free plan,
/// no subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingRecord {
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub status: BillingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    #[schema(example = "premium")]
    pub tier: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCheckoutRequest {
    #[schema(example = "cs_test_a1b2c3")]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsResponse {
    pub plan: Plan,
    pub level: u8,
    pub range_max_days: u32,
    #[schema(value_type = Object)]
    pub features: BTreeMap<String, bool>,
}

/// Body of every 402 response. The client parses the same shape back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequiredBody {
    #[schema(example = "UPGRADE_REQUIRED")]
    pub error: String,
    pub message: String,
    pub current_plan: Plan,
    pub required_plan: Plan,
}

pub const UPGRADE_REQUIRED_CODE: &str = "UPGRADE_REQUIRED";

impl UpgradeRequiredBody {
    pub fn new(feature: &str, current_plan: Plan, required_plan: Plan) -> Self {
        Self {
            error: UPGRADE_REQUIRED_CODE.to_string(),
            message: format!("{feature} requires the {required_plan} plan"),
            current_plan,
            required_plan,
        }
    }
}
