//! Configuration Module

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{ConfigFormat, generate_config, load_config, load_config_from_str};
pub use types::{Config, ExcluderConfig, ProxyConfig, WatcherConfig};
pub use validation::validate_config;
