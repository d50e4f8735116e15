//! Error types for sip-core

use thiserror::Error;

/// Result type for sip-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or building SIP messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The message could not be parsed
    #[error("SIP parse error: {0}")]
    ParseError(String),

    /// A SIP URI was malformed
    #[error("Invalid SIP URI: {0}")]
    InvalidUri(String),

    /// A header value was malformed
    #[error("Invalid {name} header: {value}")]
    InvalidHeader { name: String, value: String },
}

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError(message.into())
    }

    pub fn invalid_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            value: value.into(),
        }
    }
}
