pub mod alert_service;
pub mod measurement_service;

pub use alert_service::PgNotificationRegistry;
pub use measurement_service::PgMeasurementStore;
