use thiserror::Error;

/// Result type for user agent operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors surfaced by the SIP user agent
#[derive(Debug, Error)]
pub enum DialogError {
    /// The remote answered with a final status of 300 or above
    #[error("{method} failed with {status} {reason}")]
    Transaction {
        method: String,
        status: u16,
        reason: String,
    },

    /// The user agent was destroyed; no further requests are possible
    #[error("user agent destroyed")]
    Destroyed,

    /// A bounded wait ran out
    #[error("{method} timed out after {after_ms} ms")]
    Timeout { method: String, after_ms: u64 },

    /// Socket or connection failure
    #[error("transport error: {0}")]
    Transport(#[from] intercom_sip_transport::Error),

    /// The remote session description could not be used
    #[error("SDP error: {0}")]
    Sdp(#[from] intercom_rtp_core::Error),

    /// A message violated the subset of SIP this agent speaks
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Invalid options
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The operation does not fit the current dialog state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// The injected request handler failed
    #[error("request handler error: {message}")]
    Handler { message: String },
}

impl DialogError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Status code of a failed transaction, if that is what this is
    pub fn status(&self) -> Option<u16> {
        match self {
            DialogError::Transaction { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<intercom_sip_core::Error> for DialogError {
    fn from(e: intercom_sip_core::Error) -> Self {
        DialogError::protocol(e.to_string())
    }
}
