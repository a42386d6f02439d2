//! Plan entitlements and feature gating.
//!
//! `policy` is the pure (plan, feature) table, `cache` keeps one session's
//! billing record fresh, and `gate` combines the two into the allow/deny
//! decision every gated operation goes through.

pub mod cache;
pub mod gate;
pub mod policy;

pub use cache::{BillingSource, BillingStatusCache, CachedRecord, FetchError, Freshness};
pub use gate::AccessGate;
pub use policy::{
    FeatureKey, GateDecision, Plan, evaluate, features_for, level_of, range_max_days,
    required_level,
};
