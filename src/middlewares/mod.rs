pub mod auth;
pub mod cors;
pub mod feature_gate;

pub use auth::{AuthMiddleware, current_user_id};
pub use cors::create_cors;
pub use feature_gate::RequireFeature;
