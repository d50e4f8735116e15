//! Vendor header rewriting
//!
//! Some intercom firmware only accepts requests whose To/From URIs carry a
//! configured SIP domain instead of the IP address that was dialed, wants
//! the REGISTER Request-URI to be that domain, and needs every contact
//! tagged with a per-process id so concurrent sessions stay apart. The
//! rewrite only touches REGISTER, INVITE, MESSAGE, ACK and BYE, and only
//! when a domain override is configured.

use intercom_sip_core::{Address, HeaderName, Method, SipRequest, SipUri};

use crate::api::ContactId;

/// URI parameter carrying the per-process contact id
pub const CONTACT_ID_PARAM: &str = "uniq";

/// Methods the domain rewrite is applied to
pub fn applies_to(method: &Method) -> bool {
    matches!(
        method,
        Method::Register | Method::Invite | Method::Message | Method::Ack | Method::Bye
    )
}

fn rewrite_address_header(request: &mut SipRequest, name: HeaderName, domain: &str) {
    let Some(address) = request.headers.get(name).and_then(|v| v.parse::<Address>().ok()) else {
        return;
    };
    let rewritten = Address {
        uri: address.uri.with_host(domain),
        ..address
    };
    request.headers.set(name, rewritten.to_string());
}

/// Apply the vendor rewrite to an outbound request in place.
///
/// Returns whether anything was changed.
pub fn rewrite_request(request: &mut SipRequest, domain: Option<&str>, contact_id: &ContactId) -> bool {
    let Some(domain) = domain else {
        return false;
    };
    if !applies_to(&request.method) {
        return false;
    }

    rewrite_address_header(request, HeaderName::From, domain);
    rewrite_address_header(request, HeaderName::To, domain);

    if request.method == Method::Register {
        request.uri = SipUri::new(None, domain, None);
    }

    if let Some(mut contact) = request
        .headers
        .get(HeaderName::Contact)
        .and_then(|v| v.parse::<Address>().ok())
    {
        contact.uri.set_param(CONTACT_ID_PARAM, Some(contact_id.as_str()));
        request.headers.set(HeaderName::Contact, contact.to_string());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use intercom_sip_core::HeaderAccess;

    fn request(method: Method) -> SipRequest {
        SipRequest::new(method, "sip:door@192.168.1.30:5060".parse().unwrap())
            .with_header(HeaderName::From, "<sip:ghome@192.168.1.10:5060>;tag=abc")
            .with_header(HeaderName::To, "<sip:door@192.168.1.30:5060>")
            .with_header(HeaderName::Contact, "<sip:ghome@192.168.1.10:5062>;expires=300")
            .with_header(HeaderName::CallId, "c")
    }

    #[test]
    fn test_rewrite_register() {
        let mut register = request(Method::Register);
        assert!(rewrite_request(&mut register, Some("vendor.example"), &ContactId::new("p1")));

        assert_eq!(register.uri.to_string(), "sip:vendor.example");
        assert_eq!(
            register.headers.get(HeaderName::From),
            Some("<sip:ghome@vendor.example>;tag=abc")
        );
        assert_eq!(register.to_address().unwrap().uri.host, "vendor.example");
        assert_eq!(
            register.headers.get(HeaderName::Contact),
            Some("<sip:ghome@192.168.1.10:5062;uniq=p1>;expires=300")
        );
    }

    #[test]
    fn test_invite_keeps_request_uri() {
        let mut invite = request(Method::Invite);
        rewrite_request(&mut invite, Some("vendor.example"), &ContactId::new("p1"));
        assert_eq!(invite.uri.host, "192.168.1.30");
        assert_eq!(invite.from_address().unwrap().uri.host, "vendor.example");
    }

    #[test]
    fn test_other_methods_untouched() {
        for method in [Method::Cancel, Method::Info, Method::Options] {
            let original = request(method);
            let mut rewritten = original.clone();
            assert!(!rewrite_request(&mut rewritten, Some("vendor.example"), &ContactId::new("p1")));
            assert_eq!(rewritten, original);
        }
    }

    #[test]
    fn test_no_domain_no_rewrite() {
        let original = request(Method::Register);
        let mut rewritten = original.clone();
        assert!(!rewrite_request(&mut rewritten, None, &ContactId::new("p1")));
        assert_eq!(rewritten, original);
    }
}
