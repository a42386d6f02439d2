pub mod billing;
pub mod common;
pub mod glucose;

pub use billing::*;
pub use common::*;
pub use glucose::*;
