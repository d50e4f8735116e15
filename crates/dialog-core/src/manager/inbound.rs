//! Dispatch of inbound requests
//!
//! BYE, OPTIONS and the CANCEL bookkeeping are answered here. Everything
//! else goes to the configured [`RequestHandler`](crate::RequestHandler);
//! the agent never interprets message bodies itself.

use std::net::SocketAddr;

use intercom_sip_core::{HeaderAccess, HeaderName, Method, SipRequest, SipResponse};
use tracing::{debug, info, warn};

use super::user_agent::UserAgent;
use super::ALLOWED_METHODS;
use crate::protocol::InboundRequest;

impl UserAgent {
    pub(crate) async fn handle_request(&self, request: SipRequest, source: SocketAddr) {
        // Responses to an INVITE may be sent long after it arrived
        if request.method == Method::Invite {
            if let Some(call_id) = request.call_id() {
                self.inner.inbound_sources.lock().insert(call_id.to_string(), source);
            }
        }

        match request.method {
            Method::Bye => self.handle_bye(request, source).await,
            Method::Cancel => self.handle_cancel(request, source).await,
            Method::Options => {
                let response =
                    SipResponse::for_request(&request, 200).with_header(HeaderName::Allow, ALLOWED_METHODS);
                self.reply(response, source).await;
            }
            Method::Invite => {
                self.reply(SipResponse::for_request(&request, 100), source).await;
                self.delegate(request, source).await;
            }
            _ => self.delegate(request, source).await,
        }
    }

    async fn reply(&self, response: SipResponse, destination: SocketAddr) {
        if let Err(e) = self.send(response.into(), destination).await {
            warn!("Failed to send response to {}: {}", destination, e);
        }
    }

    async fn handle_bye(&self, request: SipRequest, source: SocketAddr) {
        let in_dialog = {
            let mut dialog = self.inner.dialog.lock();
            dialog.matches(request.call_id()) && dialog.accept_remote_cseq(request.seq())
        };
        if !in_dialog {
            debug!("BYE for unknown call {:?}", request.call_id());
            self.reply(SipResponse::for_request(&request, 481), source).await;
            return;
        }

        self.reply(SipResponse::for_request(&request, 200), source).await;
        self.end_call("remote sent BYE");
        self.notify_handler(InboundRequest::Bye(request)).await;
    }

    async fn handle_cancel(&self, request: SipRequest, source: SocketAddr) {
        let pending = {
            let dialog = self.inner.dialog.lock();
            if !dialog.matches(request.call_id()) {
                None
            } else {
                Some(dialog.pending_invite.clone())
            }
        };
        let Some(pending) = pending else {
            self.reply(SipResponse::for_request(&request, 481), source).await;
            return;
        };

        self.reply(SipResponse::for_request(&request, 200), source).await;
        if let Some(invite) = pending {
            if invite.seq() == request.seq() {
                let terminated = self.invite_terminated(&invite);
                let destination = self.inbound_source(&invite).unwrap_or(source);
                self.forget_inbound_source(&invite);
                self.reply(terminated, destination).await;
                self.end_call("remote cancelled the INVITE");
            }
        }
        self.notify_handler(InboundRequest::Cancel(request)).await;
    }

    /// 487 for an INVITE cancelled before it was answered
    fn invite_terminated(&self, invite: &SipRequest) -> SipResponse {
        let local_tag = self.inner.dialog.lock().local_tag.clone();
        let mut response = SipResponse::for_request(invite, 487);
        if let Some(to) = invite.to_address() {
            if to.tag().is_none() {
                response.headers.set(HeaderName::To, to.with_tag(&local_tag).to_string());
            }
        }
        response
    }

    /// Inform the handler about a request the agent already answered
    async fn notify_handler(&self, inbound: InboundRequest) {
        let handler = self.inner.options.read().handler.clone();
        if let Some(handler) = handler {
            if let Err(e) = handler.handle(inbound).await {
                debug!("Request handler failed on notification: {}", e);
            }
        }
    }

    /// Let the handler answer; fall back to defaults per method
    async fn delegate(&self, request: SipRequest, source: SocketAddr) {
        let Some(inbound) = InboundRequest::from_request(request.clone()) else {
            let response =
                SipResponse::for_request(&request, 405).with_header(HeaderName::Allow, ALLOWED_METHODS);
            self.reply(response, source).await;
            return;
        };

        if request.method == Method::Invite {
            let mut dialog = self.inner.dialog.lock();
            if dialog.matches(request.call_id()) {
                dialog.accept_remote_cseq(request.seq());
            }
        }

        let handler = self.inner.options.read().handler.clone();
        let outcome = match &handler {
            Some(handler) => handler.handle(inbound).await,
            None => Ok(None),
        };

        // ACK never gets a response
        if request.method == Method::Ack {
            if let Err(e) = outcome {
                warn!("Request handler failed on ACK: {}", e);
            }
            return;
        }

        let response = match outcome {
            Ok(Some(response)) => Some(response),
            Ok(None) if handler.is_none() => {
                handler_absent_default(&request.method).map(|status| SipResponse::for_request(&request, status))
            }
            Ok(None) => match request.method {
                Method::Message | Method::Info => Some(SipResponse::for_request(&request, 200)),
                _ => None,
            },
            Err(e) => {
                warn!("Request handler failed on {}: {}", request.method, e);
                Some(SipResponse::for_request(&request, 500))
            }
        };

        match response {
            Some(response) => {
                if request.method == Method::Invite {
                    info!("Answering inbound INVITE with {}", response.status);
                    if response.status >= 200 {
                        self.forget_inbound_source(&request);
                    }
                }
                self.reply(response, source).await;
            }
            None => debug!("Handler took over {} {:?}", request.method, request.call_id()),
        }
    }
}

/// Status sent when no handler is configured
fn handler_absent_default(method: &Method) -> Option<u16> {
    match method {
        Method::Invite => Some(480),
        Method::Register => Some(405),
        Method::Message | Method::Info => Some(200),
        _ => None,
    }
}
