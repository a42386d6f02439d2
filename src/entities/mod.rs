pub mod billing_records;
pub mod glucose_readings;

pub use billing_records as billing_record_entity;
pub use glucose_readings as glucose_reading_entity;
