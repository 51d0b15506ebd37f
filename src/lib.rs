pub mod alerting;
pub mod db;
pub mod notifications;
pub mod probe;
pub mod server;
pub mod services;
pub mod version;
pub mod web;
