//! Error types for ice-core

use thiserror::Error;

/// Result type for STUN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the STUN codec and binding transactions
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unexpected STUN message
    #[error("STUN error: {0}")]
    StunError(String),

    /// MESSAGE-INTEGRITY did not verify
    #[error("STUN message integrity mismatch")]
    IntegrityMismatch,

    /// No response after all retransmissions
    #[error("STUN transaction timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The remote answered with a binding error response
    #[error("STUN binding failed with error {code}: {reason}")]
    BindingFailed { code: u16, reason: String },

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
