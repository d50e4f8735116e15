//! RTP/SDP utilities for the intercom relay
//!
//! This crate is the leaf of the relay stack. It knows how to read the media
//! sections of an SDP offer/answer, how to tell STUN, RTP and RTCP apart on a
//! shared socket, how SRTP inline key material is laid out, and how to reserve
//! runs of adjacent ports for RTP/RTCP pairs.

pub mod error;
pub mod packet;
pub mod sdp;
pub mod srtp;
pub mod transport;

pub use error::{Error, Result};
pub use packet::{
    get_payload_type, get_sequence_number, is_rtp_message_payload_type, is_stun_message,
    SequenceTracker,
};
pub use sdp::{
    get_rtp_description, parse_rtp_description, split_sections, LocalStreamOptions,
    MediaType, RtpDescription, RtpOptions, RtpStreamDescription,
};
pub use srtp::{decode_srtp, encode_srtp, generate_srtp_key, SrtpKeyMaterial};
pub use transport::{reserve_ports, PortScanner, PortReserver, PortType, SystemPortScanner};

/// RTP/STUN protocol constants
pub mod constants {
    /// STUN magic cookie value (RFC 5389)
    pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

    /// Number of attempts `reserve_ports` makes before giving up
    pub const MAX_RESERVATION_ATTEMPTS: usize = 100;

    /// Length of the SRTP master key for AES_CM_128_HMAC_SHA1_80
    pub const SRTP_KEY_LEN: usize = 16;

    /// Length of the SRTP master salt for AES_CM_128_HMAC_SHA1_80
    pub const SRTP_SALT_LEN: usize = 14;
}
