//! SIP message model for the intercom relay
//!
//! Only the subset of RFC 3261 that embedded intercom endpoints speak is
//! modelled: requests and responses with a flat, case-insensitive header
//! list, SIP URIs, name-addr values with parameters, and a parser that
//! accepts both datagrams and `Content-Length` framed stream data.

pub mod error;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use parser::{frame_length, parse_message};
pub use types::address::Address;
pub use types::cseq::CSeq;
pub use types::headers::{HeaderAccess, HeaderName, Headers};
pub use types::method::Method;
pub use types::sip_request::SipRequest;
pub use types::sip_response::SipResponse;
pub use types::uri::SipUri;
pub use types::{generate_branch, generate_call_id, generate_tag, SipMessage};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Address, CSeq, Error, HeaderAccess, HeaderName, Headers, Method, Result, SipMessage, SipRequest,
        SipResponse, SipUri,
    };
}
