//! Error types for rtp-core

use thiserror::Error;

/// Result type for rtp-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing SDP or reserving ports
#[derive(Debug, Error)]
pub enum Error {
    /// The SDP could not be interpreted
    #[error("SDP parse error: {message}")]
    SdpParse { message: String, sdp: String },

    /// The session-level `c=` line is absent
    #[error("SDP has no session-level connection line")]
    MissingConnection { sdp: String },

    /// The `a=crypto` attribute is malformed
    #[error("Invalid SRTP crypto attribute: {0}")]
    InvalidCrypto(String),

    /// No run of consecutive ports could be found
    #[error("Unable to reserve consecutive ports after {attempts} attempts")]
    PortExhausted { attempts: usize },

    /// Socket level failure while probing ports
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an SDP parse error carrying the offending text
    pub fn sdp(message: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self::SdpParse {
            message: message.into(),
            sdp: sdp.into(),
        }
    }
}
