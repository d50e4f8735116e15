use std::io;

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SIP transport layer
#[derive(Error, Debug)]
pub enum Error {
    /// The transport was closed and can no longer send
    #[error("Transport closed")]
    TransportClosed,

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Inbound bytes were not a SIP message
    #[error("SIP parse error: {0}")]
    Parse(#[from] intercom_sip_core::Error),
}
