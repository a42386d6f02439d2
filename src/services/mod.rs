pub mod billing_service;
pub mod glucose_service;

pub use billing_service::*;
pub use glucose_service::*;
