use intercom_dialog_core::DialogError;
use intercom_rtp_core::MediaType;
use thiserror::Error;

use crate::media::SocketKind;

/// Result type for call session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by a call session
#[derive(Debug, Error)]
pub enum SessionError {
    /// `call()` or `answer()` was already used on this session
    #[error("call session already started")]
    AlreadyStarted,

    /// The session was stopped; it cannot be reused
    #[error("call session has ended")]
    Ended,

    /// No remote description yet
    #[error("call is not connected")]
    NotConnected,

    /// The remote did not offer this media type
    #[error("remote did not negotiate {media}")]
    MediaNotNegotiated { media: MediaType },

    /// The socket was closed, by rtcp-mux collapse or by stop()
    #[error("{media} {kind} socket is closed")]
    SocketClosed { media: MediaType, kind: SocketKind },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("event channel error: {message}")]
    Events { message: String },

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error("RTP error: {0}")]
    Rtp(#[from] intercom_rtp_core::Error),

    #[error("STUN error: {0}")]
    Stun(#[from] intercom_ice_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn events(message: impl Into<String>) -> Self {
        Self::Events {
            message: message.into(),
        }
    }

    /// SIP status of a failed call setup, if that is what this is
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Dialog(e) => e.status(),
            _ => None,
        }
    }
}
