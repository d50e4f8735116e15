//! Call setup and teardown: INVITE (both directions), ACK, CANCEL and 180

use std::net::SocketAddr;

use intercom_rtp_core::{parse_rtp_description, RtpDescription, RtpOptions};
use intercom_sip_core::{CSeq, HeaderAccess, HeaderName, Method, SipRequest, SipResponse};
use tracing::{debug, info, warn};

use super::request_builder::Body;
use super::user_agent::UserAgent;
use crate::dialog::{Dialog, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::sdp::{build_local_sdp, SectionBuilder};

const SESSION_NAME: &str = "intercom-relay";

impl UserAgent {
    /// Place or accept a call.
    ///
    /// Without `incoming` an INVITE carrying the local offer is sent and the
    /// remote answer is returned once a 2xx arrives; that 2xx is acknowledged
    /// exactly once with the INVITE's CSeq number. There is no internal
    /// timeout, callers bound the wait themselves.
    ///
    /// With `incoming` the given INVITE is answered with 200 and the local
    /// SDP, and the offer it carried is returned.
    pub async fn invite(
        &self,
        rtp_options: &RtpOptions,
        audio: &dyn SectionBuilder,
        video: &dyn SectionBuilder,
        incoming: Option<&SipRequest>,
    ) -> DialogResult<RtpDescription> {
        self.ensure_alive()?;
        let local_ip = self.inner.options.read().local_ip;
        let sdp = build_local_sdp(local_ip, SESSION_NAME, rtp_options, audio, video);

        match incoming {
            Some(invite) => self.accept_invite(invite, sdp).await,
            None => self.send_invite(sdp).await,
        }
    }

    async fn send_invite(&self, sdp: String) -> DialogResult<RtpDescription> {
        {
            let mut dialog = self.inner.dialog.lock();
            if dialog.state != DialogState::Created {
                return Err(DialogError::invalid_state(format!(
                    "cannot INVITE from dialog state {}",
                    dialog.state
                )));
            }
            dialog.state = DialogState::Inviting;
        }

        let built = self.build_request(Method::Invite, None, &[], Some(Body::new("application/sdp", sdp)));
        let (request, destination) = match built {
            Ok(built) => built,
            Err(e) => {
                // Nothing was sent, so the dialog can still place a call
                let mut dialog = self.inner.dialog.lock();
                if dialog.state == DialogState::Inviting {
                    dialog.state = DialogState::Created;
                }
                return Err(e);
            }
        };
        let seq = request.seq();
        *self.inner.outbound_invite.lock() = Some(request.clone());

        let result = self.transact(request.clone(), destination, None).await;
        *self.inner.outbound_invite.lock() = None;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.inner.dialog.lock().terminate();
                return Err(e);
            }
        };

        if response.status >= 300 {
            // Failure responses are acknowledged on the INVITE's own branch
            let ack = failure_ack(&request, &response);
            if let Err(e) = self.send(ack.into(), destination).await {
                debug!("Failed to acknowledge {} to INVITE: {}", response.status, e);
            }
            self.inner.dialog.lock().terminate();
            return Err(DialogError::Transaction {
                method: Method::Invite.to_string(),
                status: response.status,
                reason: response.reason,
            });
        }

        let instance = self.inner.options.read().gruu_instance_id.clone();
        if let Some(instance) = instance {
            self.inner.dialog.lock().gruu = Some(format!("urn:uuid:{}", instance));
        }

        self.send_ack(seq).await;

        let body = response.body_str().unwrap_or_default();
        let description = parse_rtp_description(body)?;
        info!("Call connected, remote media at {}", description.address);
        Ok(description)
    }

    /// ACK a 2xx with the INVITE's CSeq number; failures are only logged
    async fn send_ack(&self, seq: u32) {
        match self.build_request(Method::Ack, Some(seq), &[], None) {
            Ok((ack, destination)) => {
                *self.inner.last_ack.lock() = Some((ack.clone(), destination));
                if let Err(e) = self.send(ack.into(), destination).await {
                    warn!("Failed to send ACK: {}", e);
                }
            }
            Err(e) => warn!("Failed to build ACK: {}", e),
        }
    }

    /// Take over the dialog of an inbound INVITE unless it is already ours
    fn adopt_inbound_dialog(&self, invite: &SipRequest) -> DialogResult<SocketAddr> {
        let source = self.inbound_source(invite);
        let mut dialog = self.inner.dialog.lock();
        if !dialog.matches(invite.call_id()) {
            *dialog = Dialog::from_inbound_invite(invite, source)?;
        }
        Ok(dialog.remote_addr.unwrap_or_else(|| self.remote_addr()))
    }

    /// Response to an inbound INVITE carrying our tag and Contact
    fn invite_response(&self, invite: &SipRequest, status: u16) -> DialogResult<SipResponse> {
        let local_tag = self.inner.dialog.lock().local_tag.clone();
        let mut response = SipResponse::for_request(invite, status);
        if let Some(to) = invite.to_address() {
            let to = if to.tag().is_some() { to } else { to.with_tag(&local_tag) };
            response.headers.set(HeaderName::To, to.to_string());
        }
        response
            .headers
            .append(HeaderName::Contact, format!("<{}>", self.contact_uri()?));
        let user_agent = self.inner.options.read().user_agent.clone();
        response.headers.append(HeaderName::UserAgent, user_agent);
        Ok(response)
    }

    async fn accept_invite(&self, invite: &SipRequest, sdp: String) -> DialogResult<RtpDescription> {
        if invite.method != Method::Invite {
            return Err(DialogError::protocol(format!("cannot accept a {} request", invite.method)));
        }
        let remote = parse_rtp_description(invite.body_str().unwrap_or_default())?;
        let destination = self.adopt_inbound_dialog(invite)?;
        self.forget_inbound_source(invite);

        let response = self.invite_response(invite, 200)?.with_body("application/sdp", sdp);
        self.send(response.into(), destination).await?;

        let mut dialog = self.inner.dialog.lock();
        dialog.state = DialogState::Connected;
        dialog.pending_invite = None;
        info!("Accepted inbound call {}, remote media at {}", dialog.call_id, remote.address);
        Ok(remote)
    }

    /// Answer an inbound INVITE with 180 Ringing
    pub async fn send_ringing(&self, invite: &SipRequest) -> DialogResult<()> {
        self.ensure_alive()?;
        let destination = self.adopt_inbound_dialog(invite)?;
        let response = self.invite_response(invite, 180)?;
        self.send(response.into(), destination).await?;
        self.inner.dialog.lock().state = DialogState::Ringing;
        Ok(())
    }

    /// Cancel the outbound INVITE that has not been answered yet.
    ///
    /// The pending [`invite`](UserAgent::invite) then fails with the
    /// remote's 487.
    pub async fn cancel(&self) -> DialogResult<SipResponse> {
        self.ensure_alive()?;
        if self.dialog_state() == DialogState::Connected {
            return Err(DialogError::invalid_state("call already connected, use BYE"));
        }
        let invite = self
            .inner
            .outbound_invite
            .lock()
            .clone()
            .ok_or_else(|| DialogError::invalid_state("no outbound INVITE to cancel"))?;

        let mut cancel = SipRequest::new(Method::Cancel, invite.uri.clone());
        for name in [
            HeaderName::Via,
            HeaderName::Route,
            HeaderName::From,
            HeaderName::To,
            HeaderName::CallId,
            HeaderName::MaxForwards,
        ] {
            for value in invite.headers.get_all(name) {
                cancel.headers.append(name, value);
            }
        }
        cancel.set_cseq(CSeq::new(invite.seq(), Method::Cancel));

        let destination = self
            .inner
            .dialog
            .lock()
            .remote_addr
            .unwrap_or_else(|| self.remote_addr());
        let timeout = self.inner.options.read().bye_timeout();
        let response = self.transact(cancel, destination, Some(timeout)).await?;
        super::request_operations::check_response(&Method::Cancel, response)
    }

    /// Where responses to an inbound request go
    pub(crate) fn inbound_source(&self, request: &SipRequest) -> Option<SocketAddr> {
        let call_id = request.call_id()?;
        self.inner.inbound_sources.lock().get(call_id).copied()
    }

    /// Drop the remembered source once the INVITE has its final response
    pub(crate) fn forget_inbound_source(&self, request: &SipRequest) {
        if let Some(call_id) = request.call_id() {
            self.inner.inbound_sources.lock().remove(call_id);
        }
    }
}

/// ACK for a non-2xx final response: same Request-URI, top Via, From,
/// Call-ID and CSeq number as the INVITE, To from the response
fn failure_ack(invite: &SipRequest, response: &SipResponse) -> SipRequest {
    let mut ack = SipRequest::new(Method::Ack, invite.uri.clone());
    if let Some(via) = invite.headers.get(HeaderName::Via) {
        ack.headers.append(HeaderName::Via, via);
    }
    for name in [HeaderName::Route, HeaderName::From, HeaderName::CallId, HeaderName::MaxForwards] {
        for value in invite.headers.get_all(name) {
            ack.headers.append(name, value);
        }
    }
    let to = response
        .headers
        .get(HeaderName::To)
        .or_else(|| invite.headers.get(HeaderName::To))
        .unwrap_or_default()
        .to_string();
    ack.headers.append(HeaderName::To, to);
    ack.set_cseq(CSeq::new(invite.seq(), Method::Ack));
    ack
}
