pub mod config;
pub mod connections;
pub mod scheduler;
