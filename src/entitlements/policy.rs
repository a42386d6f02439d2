//! Plan levels and the static feature table.
//!
//! Everything here is pure and total: any plan string or feature key,
//! including empty or unknown ones, resolves to a decision. Unknown plans
//! fall to the lowest level and unknown features require the highest one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Subscription tier. `basic` is read as an alias of `free`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    ToSchema,
)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Plan {
    #[default]
    Free,
    Premium,
    Pro,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Premium, Plan::Pro];

    /// Never fails: anything unrecognized is `Free`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "premium" => Plan::Premium,
            "pro" => Plan::Pro,
            // "free" / "basic" / 其他未知值
            _ => Plan::Free,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Plan::Free => 0,
            Plan::Premium => 1,
            Plan::Pro => 2,
        }
    }

    /// Lowest plan that satisfies `level`; levels above the top clamp to `Pro`.
    pub fn at_level(level: u8) -> Self {
        match level {
            0 => Plan::Free,
            1 => Plan::Premium,
            _ => Plan::Pro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Premium => "premium",
            Plan::Pro => "pro",
        }
    }
}

impl From<String> for Plan {
    fn from(raw: String) -> Self {
        Plan::parse(&raw)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gated capabilities, keyed by the camelCase names the clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKey {
    CgmImport,
    CsvExport,
    PdfExport,
    InsightsFull,
    CommunityPost,
    RangeMax,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 6] = [
        FeatureKey::CgmImport,
        FeatureKey::CsvExport,
        FeatureKey::PdfExport,
        FeatureKey::InsightsFull,
        FeatureKey::CommunityPost,
        FeatureKey::RangeMax,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKey::CgmImport => "cgmImport",
            FeatureKey::CsvExport => "csvExport",
            FeatureKey::PdfExport => "pdfExport",
            FeatureKey::InsightsFull => "insightsFull",
            FeatureKey::CommunityPost => "communityPost",
            FeatureKey::RangeMax => "rangeMax",
        }
    }

    pub fn required_level(self) -> u8 {
        match self {
            FeatureKey::RangeMax => 0,
            FeatureKey::PdfExport | FeatureKey::InsightsFull | FeatureKey::CommunityPost => 1,
            FeatureKey::CgmImport | FeatureKey::CsvExport => 2,
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single entitlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a gate decision must be enforced"]
pub enum GateDecision {
    Allow,
    Deny { required_plan: Plan, current_plan: Plan },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

pub const MAX_LEVEL: u8 = 2;

pub fn level_of(plan: &str) -> u8 {
    Plan::parse(plan).level()
}

pub fn required_level(feature: &str) -> u8 {
    FeatureKey::parse(feature)
        .map(FeatureKey::required_level)
        .unwrap_or(MAX_LEVEL)
}

pub fn evaluate(plan: Plan, feature: &str) -> GateDecision {
    let required = required_level(feature);
    if plan.level() >= required {
        GateDecision::Allow
    } else {
        GateDecision::Deny {
            required_plan: Plan::at_level(required),
            current_plan: plan,
        }
    }
}

/// Longest history window (days) a plan may view.
pub fn range_max_days(plan: Plan) -> u32 {
    match plan.level() {
        0 => 7,
        1 => 14,
        _ => 30,
    }
}

/// Boolean grant for every known feature, as exposed to clients.
pub fn features_for(plan: Plan) -> BTreeMap<&'static str, bool> {
    FeatureKey::ALL
        .into_iter()
        .map(|f| (f.as_str(), evaluate(plan, f.as_str()).is_allowed()))
        .collect()
}
