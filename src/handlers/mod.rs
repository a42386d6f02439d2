pub mod auth;
pub mod billing;
pub mod glucose;
pub mod webhook;

pub use auth::auth_config;
pub use billing::billing_config;
pub use glucose::glucose_config;
pub use webhook::webhook_config;
