//! Capability interface for inbound requests
//!
//! The user agent answers BYE and OPTIONS itself. Everything else is
//! wrapped in an [`InboundRequest`] and handed to the injected
//! [`RequestHandler`], which decides what the request means for the device.

use async_trait::async_trait;
use intercom_sip_core::{Method, SipRequest, SipResponse};

use crate::errors::DialogResult;

/// Inbound requests the user agent understands
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Register(SipRequest),
    Invite(SipRequest),
    Ack(SipRequest),
    Bye(SipRequest),
    Cancel(SipRequest),
    Message(SipRequest),
    Info(SipRequest),
}

impl InboundRequest {
    /// Classify a request; `None` for methods outside the supported set
    pub fn from_request(request: SipRequest) -> Option<Self> {
        let inbound = match request.method {
            Method::Register => InboundRequest::Register(request),
            Method::Invite => InboundRequest::Invite(request),
            Method::Ack => InboundRequest::Ack(request),
            Method::Bye => InboundRequest::Bye(request),
            Method::Cancel => InboundRequest::Cancel(request),
            Method::Message => InboundRequest::Message(request),
            Method::Info => InboundRequest::Info(request),
            _ => return None,
        };
        Some(inbound)
    }

    pub fn request(&self) -> &SipRequest {
        match self {
            InboundRequest::Register(r)
            | InboundRequest::Invite(r)
            | InboundRequest::Ack(r)
            | InboundRequest::Bye(r)
            | InboundRequest::Cancel(r)
            | InboundRequest::Message(r)
            | InboundRequest::Info(r) => r,
        }
    }

    pub fn into_request(self) -> SipRequest {
        match self {
            InboundRequest::Register(r)
            | InboundRequest::Invite(r)
            | InboundRequest::Ack(r)
            | InboundRequest::Bye(r)
            | InboundRequest::Cancel(r)
            | InboundRequest::Message(r)
            | InboundRequest::Info(r) => r,
        }
    }

    pub fn method(&self) -> &Method {
        &self.request().method
    }
}

/// Device-specific handling of inbound requests.
///
/// Returning `Ok(Some(response))` sends that response. `Ok(None)` leaves the
/// reply to the user agent's default for the method; for INVITE that means
/// no reply at all, since the handler is expected to ring or answer the call
/// through the user agent itself.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: InboundRequest) -> DialogResult<Option<SipResponse>>;
}
