use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use intercom_sip_core::{HeaderAccess, Method, SipMessage, SipRequest, SipResponse};
use intercom_sip_transport::{TcpTransport, Transport, TransportEvent, TransportType, UdpTransport};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::api::{ContactId, SipOptions};
use crate::dialog::{Dialog, DialogState, Registration};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::{Delivery, TransactionKey, TransactionTable};

/// SIP user agent for one remote device.
///
/// Cloning yields another handle to the same agent. The agent owns its
/// transport exclusively; [`destroy`](UserAgent::destroy) closes it and
/// fails every pending transaction.
#[derive(Clone)]
pub struct UserAgent {
    pub(crate) inner: Arc<AgentInner>,
}

pub(crate) struct AgentInner {
    pub(crate) options: RwLock<SipOptions>,
    pub(crate) contact_id: ContactId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) remote_addr: RwLock<SocketAddr>,
    pub(crate) dialog: Mutex<Dialog>,
    pub(crate) registration: Mutex<Registration>,
    pub(crate) transactions: TransactionTable,
    /// Last INVITE we sent; CANCEL is built from it
    pub(crate) outbound_invite: Mutex<Option<SipRequest>>,
    /// ACK for the last 2xx, re-sent when the 2xx is retransmitted
    pub(crate) last_ack: Mutex<Option<(SipRequest, SocketAddr)>>,
    /// Source address of each inbound INVITE still awaiting its final response
    pub(crate) inbound_sources: Mutex<HashMap<String, SocketAddr>>,
    pub(crate) call_ended: watch::Sender<bool>,
    pub(crate) destroyed: AtomicBool,
    /// Set when the transport closed without `destroy`
    pub(crate) transport_lost: AtomicBool,
}

/// Resolve the `to` URI to the address requests are sent to
async fn resolve_remote(options: &SipOptions) -> DialogResult<SocketAddr> {
    let uri = options.to_uri()?;
    let target = uri.host_port();
    let found = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| DialogError::configuration(format!("cannot resolve {}: {}", target, e)))?
        .next();
    found.ok_or_else(|| DialogError::configuration(format!("{} resolved to no address", target)))
}

impl UserAgent {
    /// Bind (UDP) or connect (TCP) a transport according to `options` and
    /// start the agent.
    pub async fn new(options: SipOptions, contact_id: ContactId) -> DialogResult<Self> {
        options.validate()?;
        let remote = resolve_remote(&options).await?;

        let (transport, events): (Arc<dyn Transport>, _) = match options.transport {
            TransportType::Udp => {
                let bind = SocketAddr::new(options.local_ip, options.local_port);
                let (transport, events) = UdpTransport::bind(bind, None).await?;
                (Arc::new(transport), events)
            }
            TransportType::Tcp => {
                let (transport, events) = TcpTransport::connect(remote, None).await?;
                (Arc::new(transport), events)
            }
        };

        Self::with_transport(options, contact_id, transport, events, remote)
    }

    /// Start an agent on an already running transport
    pub fn with_transport(
        options: SipOptions,
        contact_id: ContactId,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        remote_addr: SocketAddr,
    ) -> DialogResult<Self> {
        options.validate()?;
        let local_addr = transport.local_addr()?;
        let dialog = Dialog::new_outbound(options.from_uri()?, options.to_uri()?);
        let (call_ended, _) = watch::channel(false);

        info!(
            "SIP user agent {} -> {} over {} (contact id {})",
            local_addr,
            remote_addr,
            transport.transport_type(),
            contact_id
        );

        let agent = UserAgent {
            inner: Arc::new(AgentInner {
                options: RwLock::new(options),
                contact_id,
                transport,
                local_addr,
                remote_addr: RwLock::new(remote_addr),
                dialog: Mutex::new(dialog),
                registration: Mutex::new(Registration::new()),
                transactions: TransactionTable::new(),
                outbound_invite: Mutex::new(None),
                last_ack: Mutex::new(None),
                inbound_sources: Mutex::new(HashMap::new()),
                call_ended,
                destroyed: AtomicBool::new(false),
                transport_lost: AtomicBool::new(false),
            }),
        };
        agent.spawn_receive_loop(events);
        Ok(agent)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        *self.inner.remote_addr.read()
    }

    pub fn contact_id(&self) -> &ContactId {
        &self.inner.contact_id
    }

    /// Snapshot of the current options
    pub fn options(&self) -> SipOptions {
        self.inner.options.read().clone()
    }

    /// Snapshot of the call dialog
    pub fn dialog(&self) -> Dialog {
        self.inner.dialog.lock().clone()
    }

    pub fn dialog_state(&self) -> DialogState {
        self.inner.dialog.lock().state
    }

    /// Replace the options for the next call attempt.
    ///
    /// The transport is kept, so transport kind and local port changes only
    /// take effect on a new agent. The call dialog starts over.
    pub async fn reconfigure(&self, options: SipOptions) -> DialogResult<()> {
        self.ensure_alive()?;
        options.validate()?;
        let remote = resolve_remote(&options).await?;

        {
            let current = self.inner.options.read();
            if options.transport != current.transport
                || (options.local_port != 0 && options.local_port != self.inner.local_addr.port())
            {
                warn!("Transport settings changed; they apply to the next user agent, not this one");
            }
        }

        let dialog = Dialog::new_outbound(options.from_uri()?, options.to_uri()?);
        *self.inner.options.write() = options;
        *self.inner.remote_addr.write() = remote;
        *self.inner.dialog.lock() = dialog;
        *self.inner.outbound_invite.lock() = None;
        *self.inner.last_ack.lock() = None;
        self.inner.inbound_sources.lock().clear();
        self.inner.call_ended.send_replace(false);
        debug!("User agent reconfigured, remote now {}", remote);
        Ok(())
    }

    /// Subscribe to the call-ended flag; it flips to `true` once per call
    pub fn call_ended(&self) -> watch::Receiver<bool> {
        self.inner.call_ended.subscribe()
    }

    pub fn is_call_ended(&self) -> bool {
        *self.inner.call_ended.borrow()
    }

    /// Resolves once the call has ended
    pub async fn wait_call_ended(&self) {
        let mut rx = self.inner.call_ended.subscribe();
        // The sender lives as long as the agent, which `self` keeps alive
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// End the dialog and notify subscribers, once
    pub(crate) fn end_call(&self, reason: &str) {
        self.inner.dialog.lock().terminate();
        self.inner.inbound_sources.lock().clear();
        let changed = self.inner.call_ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        });
        if changed {
            info!("Call ended: {}", reason);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Close the transport and fail all pending transactions. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let abandoned = self.inner.transactions.clear();
        if abandoned > 0 {
            debug!("Abandoned {} pending transaction(s)", abandoned);
        }
        if let Err(e) = self.inner.transport.close().await {
            warn!("Error closing SIP transport: {}", e);
        }
        self.inner.dialog.lock().terminate();
        self.inner.inbound_sources.lock().clear();
        info!("SIP user agent {} destroyed", self.inner.local_addr);
    }

    /// The transport went away without `destroy`: the agent is unusable from
    /// here on, pending transactions fail and the call ends
    fn handle_transport_closed(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.transport_lost.store(true, Ordering::Release);
        let abandoned = self.inner.transactions.clear();
        warn!(
            "SIP transport to {} closed, failed {} pending transaction(s)",
            self.remote_addr(),
            abandoned
        );
        self.end_call("SIP transport closed");
    }

    /// Whether the transport closed underneath the agent
    pub fn is_transport_lost(&self) -> bool {
        self.inner.transport_lost.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> DialogError {
        if self.is_transport_lost() {
            DialogError::Transport(intercom_sip_transport::Error::TransportClosed)
        } else {
            DialogError::Destroyed
        }
    }

    pub(crate) fn ensure_alive(&self) -> DialogResult<()> {
        if self.is_destroyed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn log_message(&self, direction: &str, peer: SocketAddr, message: &SipMessage) {
        let bytes = message.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        if self.inner.options.read().debug {
            info!("SIP {} {}:\n{}", direction, peer, text);
        } else {
            trace!("SIP {} {}:\n{}", direction, peer, text);
        }
    }

    /// Send a message without waiting for anything
    pub(crate) async fn send(&self, message: SipMessage, destination: SocketAddr) -> DialogResult<()> {
        self.ensure_alive()?;
        self.log_message("to", destination, &message);
        self.inner
            .transport
            .send_message(message, destination)
            .await
            .map_err(|e| match e {
                intercom_sip_transport::Error::TransportClosed => DialogError::Destroyed,
                other => DialogError::Transport(other),
            })
    }

    /// Send `request` and wait for its final response.
    ///
    /// `timeout` of `None` waits indefinitely; callers impose their own bound.
    pub(crate) async fn transact(
        &self,
        request: SipRequest,
        destination: SocketAddr,
        timeout: Option<Duration>,
    ) -> DialogResult<SipResponse> {
        let key = TransactionKey::new(
            request
                .call_id()
                .ok_or_else(|| DialogError::protocol("request without Call-ID"))?,
            request.seq(),
            request.method.clone(),
        );
        let method = request.method.clone();
        let rx = self.inner.transactions.register(key.clone());

        if let Err(e) = self.send(request.into(), destination).await {
            self.inner.transactions.remove(&key);
            return Err(e);
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.transactions.remove(&key);
                    return Err(DialogError::Timeout {
                        method: method.to_string(),
                        after_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| self.closed_error())
    }

    fn spawn_receive_loop(&self, mut events: mpsc::Receiver<TransportEvent>) {
        let weak: Weak<AgentInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let agent = UserAgent { inner };

                match event {
                    TransportEvent::MessageReceived { message, source, .. } => {
                        agent.log_message("from", source, &message);
                        match message {
                            SipMessage::Response(response) => agent.handle_response(response),
                            SipMessage::Request(request) => {
                                // Handlers may call back into the agent and wait
                                // for responses, so they never run on this loop
                                tokio::spawn(async move {
                                    agent.handle_request(request, source).await;
                                });
                            }
                        }
                    }
                    TransportEvent::Error { error } => {
                        debug!("Ignoring malformed inbound SIP traffic: {}", error);
                    }
                    TransportEvent::Closed => break,
                }
            }
            if let Some(inner) = weak.upgrade() {
                UserAgent { inner }.handle_transport_closed();
            }
            debug!("User agent receive loop finished");
        });
    }

    fn handle_response(&self, response: SipResponse) {
        let cseq = response.cseq();
        let is_invite = cseq.as_ref().map(|c| c.method == Method::Invite).unwrap_or(false);

        if is_invite {
            let mut dialog = self.inner.dialog.lock();
            if dialog.matches(response.call_id()) && !dialog.state.is_ended() {
                dialog.apply_invite_response(&response);
            }
        }

        let success = response.is_success();
        let call_id = response.call_id().map(str::to_string);
        match self.inner.transactions.deliver(response) {
            Delivery::Delivered => {}
            Delivery::Provisional => trace!("Provisional response for {:?}", cseq),
            Delivery::Unmatched if is_invite && success => self.retransmit_ack(call_id, cseq.map(|c| c.seq)),
            Delivery::Unmatched => debug!("Dropping stray response for {:?}", cseq),
        }
    }

    /// A repeated 2xx means our ACK was lost
    fn retransmit_ack(&self, call_id: Option<String>, seq: Option<u32>) {
        let Some((ack, destination)) = self.inner.last_ack.lock().clone() else {
            return;
        };
        if ack.call_id().map(str::to_string) != call_id || Some(ack.seq()) != seq {
            return;
        }
        let agent = self.clone();
        tokio::spawn(async move {
            debug!("Re-sending ACK for retransmitted 2xx");
            if let Err(e) = agent.send(ack.into(), destination).await {
                warn!("Failed to re-send ACK: {}", e);
            }
        });
    }
}

impl std::fmt::Debug for UserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgent")
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.dialog_state())
            .finish()
    }
}
