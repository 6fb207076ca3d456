// BasaltDB common types and configuration

pub mod types;
pub mod config;

pub use config::DatabaseConfig;
