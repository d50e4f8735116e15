//! SIP message types

pub mod address;
pub mod cseq;
pub mod headers;
pub mod method;
pub mod sip_request;
pub mod sip_response;
pub mod uri;

use bytes::Bytes;
use rand::Rng;

use crate::types::headers::HeaderAccess;
use crate::types::sip_request::SipRequest;
use crate::types::sip_response::SipResponse;

/// A parsed SIP message
#[derive(Debug, Clone, PartialEq)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            SipMessage::Request(request) => request.to_bytes(),
            SipMessage::Response(response) => response.to_bytes(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SipMessage::Request(request) => request.call_id(),
            SipMessage::Response(response) => response.call_id(),
        }
    }
}

impl From<SipRequest> for SipMessage {
    fn from(request: SipRequest) -> Self {
        SipMessage::Request(request)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(response: SipResponse) -> Self {
        SipMessage::Response(response)
    }
}

/// Random From/To tag
pub fn generate_tag() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Random Via branch carrying the RFC 3261 magic prefix
pub fn generate_branch() -> String {
    format!("z9hG4bK{:016x}", rand::thread_rng().gen::<u64>())
}

/// Random Call-ID
pub fn generate_call_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
