//! The SIP user agent
//!
//! The agent is split by concern: construction, the receive loop and
//! transaction plumbing live in `user_agent`, request construction in
//! `request_builder`, the public operations in `request_operations` and
//! `call_operations`, and inbound dispatch in `inbound`.

mod call_operations;
mod inbound;
mod request_builder;
mod request_operations;
mod user_agent;

pub use user_agent::UserAgent;

/// Methods advertised in Allow headers
pub const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL, MESSAGE, INFO, OPTIONS";
