//! # SIP Request Message
//!
//! A request is a request-line (method, Request-URI, `SIP/2.0`), an ordered
//! header list and an optional body. `Content-Length` is always recomputed
//! from the body when the request is serialised.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::cseq::CSeq;
use crate::types::headers::{HeaderAccess, HeaderName, Headers};
use crate::types::method::Method;
use crate::types::uri::SipUri;

/// A SIP request message
#[derive(Debug, Clone, PartialEq)]
pub struct SipRequest {
    pub method: Method,
    pub uri: SipUri,
    pub headers: Headers,
    pub body: Bytes,
}

impl SipRequest {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Builder-style header append
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach a body together with its Content-Type
    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.set(HeaderName::ContentType, content_type);
        self.body = body.into();
        self
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The CSeq number, or 0 when the header is absent or malformed
    pub fn seq(&self) -> u32 {
        self.cseq().map(|cseq| cseq.seq).unwrap_or(0)
    }

    /// Topmost Via branch parameter
    pub fn branch(&self) -> Option<&str> {
        let via = self.headers.get(HeaderName::Via)?;
        via.split(';')
            .skip(1)
            .filter_map(|p| p.trim().split_once('='))
            .find(|(name, _)| name.eq_ignore_ascii_case("branch"))
            .map(|(_, value)| value)
    }

    pub fn set_cseq(&mut self, cseq: CSeq) {
        self.headers.set(HeaderName::CSeq, cseq.to_string());
    }

    /// Serialise to wire format
    pub fn to_bytes(&self) -> Bytes {
        let mut head = String::with_capacity(512);
        let _ = write!(head, "{} {} SIP/2.0\r\n", self.method, self.uri);
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

impl HeaderAccess for SipRequest {
    fn headers(&self) -> &Headers {
        &self.headers
    }
}
