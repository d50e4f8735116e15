//! The call dialog value object
//!
//! A [`Dialog`] is owned by exactly one user agent and only mutated from
//! that agent's own request and response paths. The call-id and local tag
//! never change once created; the remote tag is learned from the first
//! message carrying one and then stays fixed.

use std::net::SocketAddr;

use intercom_sip_core::{
    generate_call_id, generate_tag, HeaderAccess, HeaderName, SipRequest, SipResponse, SipUri,
};
use tracing::debug;

use super::dialog_state::DialogState;
use crate::errors::{DialogError, DialogResult};

/// A SIP call dialog
#[derive(Debug, Clone)]
pub struct Dialog {
    pub call_id: String,
    pub state: DialogState,

    /// URI placed in our From header
    pub local_uri: SipUri,

    /// URI placed in our To header
    pub remote_uri: SipUri,

    pub local_tag: String,
    pub remote_tag: Option<String>,

    /// Last CSeq number we used
    pub local_cseq: u32,

    /// Highest CSeq number seen from the remote
    pub remote_cseq: u32,

    /// Remote Contact; the Request-URI of in-dialog requests
    pub remote_target: Option<SipUri>,

    /// Route headers for in-dialog requests
    pub route_set: Vec<String>,

    /// Where in-dialog requests go when the remote started the call
    pub remote_addr: Option<SocketAddr>,

    /// True when we sent the INVITE
    pub is_initiator: bool,

    /// Public GRUU learned from the INVITE 200
    pub gruu: Option<String>,

    /// Inbound INVITE that has not been answered with a final response yet
    pub pending_invite: Option<SipRequest>,
}

impl Dialog {
    /// Fresh dialog for a call we initiate
    pub fn new_outbound(local_uri: SipUri, remote_uri: SipUri) -> Self {
        Self {
            call_id: generate_call_id(),
            state: DialogState::Created,
            local_uri,
            remote_uri,
            local_tag: generate_tag(),
            remote_tag: None,
            local_cseq: 0,
            remote_cseq: 0,
            remote_target: None,
            route_set: Vec::new(),
            remote_addr: None,
            is_initiator: true,
            gruu: None,
            pending_invite: None,
        }
    }

    /// Dialog adopted from an inbound INVITE.
    ///
    /// Tags are swapped: the request's From tag becomes the remote tag and
    /// the local tag is taken from its To header when present.
    pub fn from_inbound_invite(request: &SipRequest, source: Option<SocketAddr>) -> DialogResult<Self> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::protocol("INVITE without Call-ID"))?
            .to_string();
        let from = request
            .from_address()
            .ok_or_else(|| DialogError::protocol("INVITE without a valid From header"))?;
        let to = request
            .to_address()
            .ok_or_else(|| DialogError::protocol("INVITE without a valid To header"))?;

        Ok(Self {
            call_id,
            state: DialogState::Created,
            local_tag: to.tag().map(str::to_string).unwrap_or_else(generate_tag),
            remote_tag: from.tag().map(str::to_string),
            local_uri: to.uri,
            remote_uri: from.uri,
            local_cseq: 0,
            remote_cseq: request.seq(),
            remote_target: request.contact().map(|contact| contact.uri),
            route_set: request
                .headers
                .get_all(HeaderName::RecordRoute)
                .into_iter()
                .map(str::to_string)
                .collect(),
            remote_addr: source,
            is_initiator: false,
            gruu: None,
            pending_invite: Some(request.clone()),
        })
    }

    /// Allocate the CSeq number for a new request
    pub fn next_cseq(&mut self) -> u32 {
        self.local_cseq = self.local_cseq.wrapping_add(1);
        self.local_cseq
    }

    /// Record the remote tag unless one is already known; true when learned
    pub fn learn_remote_tag(&mut self, tag: Option<&str>) -> bool {
        match (&self.remote_tag, tag) {
            (None, Some(tag)) if !tag.is_empty() => {
                debug!("Dialog {} learned remote tag {}", self.call_id, tag);
                self.remote_tag = Some(tag.to_string());
                true
            }
            _ => false,
        }
    }

    /// Fold a response to our INVITE into the dialog
    pub fn apply_invite_response(&mut self, response: &SipResponse) {
        self.learn_remote_tag(response.to_tag().as_deref());

        if response.is_provisional() {
            if self.state == DialogState::Inviting {
                self.state = DialogState::Ringing;
            }
            return;
        }

        if response.is_success() {
            self.state = DialogState::Connected;
            if let Some(contact) = response.contact() {
                self.remote_target = Some(contact.uri);
            }
            // UAC route set is the Record-Route list in reverse
            self.route_set = response
                .headers
                .get_all(HeaderName::RecordRoute)
                .into_iter()
                .rev()
                .map(str::to_string)
                .collect();
        }
    }

    /// Track the remote CSeq of an in-dialog request; false for stale numbers
    pub fn accept_remote_cseq(&mut self, seq: u32) -> bool {
        if self.remote_cseq != 0 && seq < self.remote_cseq {
            return false;
        }
        self.remote_cseq = seq;
        true
    }

    pub fn matches(&self, call_id: Option<&str>) -> bool {
        call_id == Some(self.call_id.as_str())
    }

    /// Request-URI for requests inside this dialog
    pub fn request_uri(&self) -> SipUri {
        self.remote_target.clone().unwrap_or_else(|| self.remote_uri.clone())
    }

    pub fn terminate(&mut self) {
        self.state = DialogState::Ended;
        self.pending_invite = None;
    }
}

/// Call-id, tag and CSeq counter used for REGISTER transactions.
///
/// Registrations outlive calls, so they never share the call dialog's
/// identity.
#[derive(Debug, Clone)]
pub struct Registration {
    pub call_id: String,
    pub local_tag: String,
    pub cseq: u32,
}

impl Registration {
    pub fn new() -> Self {
        Self {
            call_id: generate_call_id(),
            local_tag: generate_tag(),
            cseq: 0,
        }
    }

    pub fn next_cseq(&mut self) -> u32 {
        self.cseq = self.cseq.wrapping_add(1);
        self.cseq
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}
