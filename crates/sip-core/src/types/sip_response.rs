//! # SIP Response Message

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::headers::{HeaderAccess, HeaderName, Headers};
use crate::types::sip_request::SipRequest;

/// Default reason phrase for the status codes this agent produces
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A SIP response message
#[derive(Debug, Clone, PartialEq)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl SipResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Response to `request` carrying the headers RFC 3261 §8.2.6.2 requires
    /// to be copied (Via, From, To, Call-ID, CSeq) plus Record-Route.
    pub fn for_request(request: &SipRequest, status: u16) -> Self {
        let mut response = Self::new(status, reason_phrase(status));
        for name in [
            HeaderName::Via,
            HeaderName::RecordRoute,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::CSeq,
        ] {
            for value in request.headers.get_all(name) {
                response.headers.append(name, value);
            }
        }
        response
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.set(HeaderName::ContentType, content_type);
        self.body = body.into();
        self
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn is_provisional(&self) -> bool {
        self.status < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut head = String::with_capacity(512);
        let _ = write!(head, "SIP/2.0 {} {}\r\n", self.status, self.reason);
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-length") || name == "l" {
                continue;
            }
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        let _ = write!(head, "Content-Length: {}\r\n\r\n", self.body.len());

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl HeaderAccess for SipResponse {
    fn headers(&self) -> &Headers {
        &self.headers
    }
}
