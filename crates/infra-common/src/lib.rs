//! Shared infrastructure for the intercom relay: logging setup and TOML
//! configuration loading

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_toml, parse_toml};
pub use errors::{Error, Result};
pub use logging::{log_welcome, setup_logging, LoggingConfig};
