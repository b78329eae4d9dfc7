pub mod config;

pub use config::{BusConfig, ConfigError};
