//! Client-side entitlement handling for Rust consumers of this API
//! (CLI tools, sync agents). Shares the policy and cache with the server.

pub mod api;
pub mod gate;
pub mod prompt;

pub use api::{BillingApiClient, HttpBillingSource};
pub use gate::{ClientGate, Gated, SessionState};
pub use prompt::UpgradePrompt;
