//! STUN support for NAT traversal of intercom media.
//!
//! Intercom devices either run ICE (and therefore expect authenticated
//! connectivity checks and answers to their own checks) or rely on plain
//! STUN binding requests as a keepalive that holds NAT bindings open. This
//! crate provides the message codec plus the two halves of a binding
//! exchange: a transaction client and a responder.

// Error handling
pub mod error;

// Core STUN protocol implementation
pub mod stun;

// Binding transactions and responder
pub mod binding;

pub use binding::{send_binding_request, BindingClient, IceCredentials, RetransmitConfig, StunResponder};
pub use error::{Error, Result};
pub use stun::{StunAttribute, StunAttributeType, StunMessage, StunMessageType};

/// STUN protocol constants
pub mod constants {
    /// STUN magic cookie value (RFC 5389)
    pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

    /// XOR applied to the CRC-32 in FINGERPRINT ("STUN")
    pub const STUN_FINGERPRINT_XOR: u32 = 0x5354554e;

    /// STUN message header size
    pub const STUN_HEADER_SIZE: usize = 20;
}
