//! Construction of outbound requests
//!
//! REGISTER uses the registration identity; every other method is built
//! from the call dialog. The vendor rewrite runs last so that it sees the
//! final To, From and Contact values.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use intercom_sip_core::{generate_branch, Address, CSeq, HeaderName, Method, SipRequest, SipUri};
use intercom_sip_transport::TransportType;

use super::user_agent::UserAgent;
use crate::dialog::DialogState;
use crate::errors::DialogResult;
use crate::protocol::quirks;

/// URI parameter carrying the GRUU on contacts after a successful INVITE
pub const GRUU_PARAM: &str = "gr";

/// Contact header parameter carrying the instance id on REGISTER
pub const INSTANCE_PARAM: &str = "+sip.instance";

/// Body of an outbound request
#[derive(Debug, Clone)]
pub(crate) struct Body {
    pub content_type: String,
    pub content: Bytes,
}

impl Body {
    pub fn new(content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }
}

impl UserAgent {
    /// Address advertised in Via and Contact
    pub(crate) fn advertised_addr(&self) -> SocketAddr {
        let options = self.inner.options.read();
        SocketAddr::new(options.local_ip, self.inner.local_addr.port())
    }

    fn via_value(&self) -> String {
        let transport = self.inner.options.read().transport;
        format!(
            "SIP/2.0/{} {};branch={};rport",
            transport.as_str(),
            self.advertised_addr(),
            generate_branch()
        )
    }

    /// Our Contact URI
    pub(crate) fn contact_uri(&self) -> DialogResult<SipUri> {
        let options = self.inner.options.read();
        let from = options.from_uri()?;
        let advertised = SocketAddr::new(options.local_ip, self.inner.local_addr.port());
        let host = match advertised.ip() {
            IpAddr::V6(v6) => format!("[{}]", v6),
            v4 => v4.to_string(),
        };
        let mut uri = SipUri::new(from.user.as_deref(), host, Some(advertised.port()));
        if options.transport == TransportType::Tcp {
            uri.set_param("transport", Some("tcp"));
        }
        Ok(uri)
    }

    fn contact_value(&self, method: &Method) -> DialogResult<String> {
        let mut uri = self.contact_uri()?;
        if let Some(gruu) = self.inner.dialog.lock().gruu.clone() {
            if *method != Method::Register {
                uri.set_param(GRUU_PARAM, Some(&gruu));
            }
        }

        let mut contact = Address::new(uri);
        if *method == Method::Register {
            let options = self.inner.options.read();
            contact.set_param("expires", Some(&options.lease().to_string()));
            if let Some(instance) = &options.gruu_instance_id {
                contact.set_param(INSTANCE_PARAM, Some(&format!("\"<urn:uuid:{}>\"", instance)));
            }
        }
        Ok(contact.to_string())
    }

    /// Build an outbound request and the address it goes to.
    ///
    /// `seq` reuses a CSeq number instead of allocating one, which ACK and
    /// CANCEL rely on. `extra_headers` are appended after the standard set.
    pub(crate) fn build_request(
        &self,
        method: Method,
        seq: Option<u32>,
        extra_headers: &[(String, String)],
        body: Option<Body>,
    ) -> DialogResult<(SipRequest, SocketAddr)> {
        let (uri, from, to, call_id, seq, routes, destination) = if method == Method::Register {
            let options = self.inner.options.read();
            let aor = options.from_uri()?;
            let target = options.to_uri()?;
            let mut registration = self.inner.registration.lock();
            let seq = seq.unwrap_or_else(|| registration.next_cseq());
            let from = Address::new(aor.clone()).with_tag(&registration.local_tag);
            (
                SipUri::new(None, target.host.clone(), target.port),
                from,
                Address::new(aor),
                registration.call_id.clone(),
                seq,
                Vec::new(),
                self.remote_addr(),
            )
        } else {
            let mut dialog = self.inner.dialog.lock();
            let seq = seq.unwrap_or_else(|| dialog.next_cseq());
            let from = Address::new(dialog.local_uri.clone()).with_tag(&dialog.local_tag);
            let mut to = Address::new(dialog.remote_uri.clone());
            if let Some(tag) = &dialog.remote_tag {
                to = to.with_tag(tag);
            }
            let routes = if dialog.state == DialogState::Connected {
                dialog.route_set.clone()
            } else {
                Vec::new()
            };
            (
                dialog.request_uri(),
                from,
                to,
                dialog.call_id.clone(),
                seq,
                routes,
                dialog.remote_addr.unwrap_or_else(|| self.remote_addr()),
            )
        };

        let user_agent = self.inner.options.read().user_agent.clone();
        let mut request = SipRequest::new(method.clone(), uri)
            .with_header(HeaderName::Via, self.via_value())
            .with_header(HeaderName::MaxForwards, "70")
            .with_header(HeaderName::From, from.to_string())
            .with_header(HeaderName::To, to.to_string())
            .with_header(HeaderName::CallId, call_id)
            .with_header(HeaderName::CSeq, CSeq::new(seq, method.clone()).to_string());

        for route in routes {
            request.headers.append(HeaderName::Route, route);
        }
        if matches!(method, Method::Invite | Method::Register | Method::Ack) {
            request.headers.append(HeaderName::Contact, self.contact_value(&method)?);
        }
        request.headers.append(HeaderName::UserAgent, user_agent);
        for (name, value) in extra_headers {
            request.headers.append(name, value.clone());
        }
        if let Some(body) = body {
            request = request.with_body(&body.content_type, body.content);
        }

        let domain = self.inner.options.read().domain_override().map(str::to_string);
        quirks::rewrite_request(&mut request, domain.as_deref(), &self.inner.contact_id);
        Ok((request, destination))
    }
}
