//! Public configuration surface of the user agent

pub mod config;

pub use config::{ContactId, SipOptions};
