//! Call session lifecycle
//!
//! A [`CallSession`] is created per call attempt and is not reusable. Two
//! one-way latches guard it: `started` flips on the first `call()` or
//! `answer()`, `ended` on the first `stop()` or remote hangup. Everything
//! the session spawns hangs off one cancellation token and holds only a weak
//! reference, so dropping the last handle also tears the tasks down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use intercom_dialog_core::{DialogState, SectionBuilder, UserAgent};
use intercom_ice_core::{BindingClient, IceCredentials, StunResponder};
use intercom_rtp_core::{
    generate_srtp_key, MediaType, PortReserver, RtpDescription, RtpOptions, SequenceTracker,
};
use intercom_sip_core::SipRequest;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::nat::NatStrategy;
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::manager::{SessionEvent, SessionEventProcessor, SessionEventSubscriber};
use crate::media::{MediaSockets, SocketKind};

pub(crate) const MEDIA_TYPES: [MediaType; 2] = [MediaType::Audio, MediaType::Video];

/// Receive-side counters for one media type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamHealth {
    /// A datagram other than STUN arrived on the RTP socket
    pub latched: bool,
    pub packets: u64,
    /// Sequence discontinuities, see [`SequenceTracker`]
    pub lost: u64,
    pub rtcp_packets: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionHealth {
    pub audio: StreamHealth,
    pub video: StreamHealth,
}

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub(crate) latched: AtomicBool,
    pub(crate) tracker: Mutex<SequenceTracker>,
    pub(crate) rtcp_packets: AtomicU64,
}

impl StreamState {
    fn health(&self) -> StreamHealth {
        let tracker = self.tracker.lock();
        StreamHealth {
            latched: self.latched.load(Ordering::Acquire),
            packets: tracker.received(),
            lost: tracker.lost(),
            rtcp_packets: self.rtcp_packets.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) agent: UserAgent,
    pub(crate) config: SessionConfig,
    pub(crate) sockets: MediaSockets,
    reserver: Arc<PortReserver>,
    pub(crate) rtp_options: RtpOptions,
    pub(crate) local_ice: IceCredentials,
    pub(crate) events: SessionEventProcessor,
    pub(crate) binding: BindingClient,
    pub(crate) responder: RwLock<Option<StunResponder>>,
    pub(crate) audio: StreamState,
    pub(crate) video: StreamState,
    pub(crate) remote: RwLock<Option<RtpDescription>>,
    pub(crate) strategy: RwLock<Option<NatStrategy>>,
    pub(crate) cancel: CancellationToken,
    started: AtomicBool,
    ended: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl SessionInner {
    pub(crate) fn stream_state(&self, media: MediaType) -> &StreamState {
        match media {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<()> {
        if self.is_ended() {
            return Err(SessionError::Ended);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }
        Ok(())
    }

    /// Apply the remote description: collapse multiplexed RTCP and start NAT traversal
    fn connect(self: &Arc<Self>, remote: RtpDescription) {
        for media in MEDIA_TYPES {
            let stream = remote.stream(media);
            if stream.is_rtcp_muxed() && self.sockets.get(media, SocketKind::Rtcp).close() {
                debug!("{} RTCP multiplexed on port {}, closed the dedicated socket", media, stream.port);
            }
        }

        let strategy = NatStrategy::for_description(&remote);
        info!(
            "Call connected to {} (audio {}, video {}), NAT traversal via {}",
            remote.address, remote.audio.port, remote.video.port, strategy
        );
        *self.remote.write() = Some(remote);
        *self.strategy.write() = Some(strategy);

        match strategy {
            NatStrategy::Ice => self.start_ice(),
            NatStrategy::StunKeepalive => self.start_keepalive(),
        }
    }

    /// Socket and remote endpoint for traffic of `kind`.
    ///
    /// RTCP goes through the RTP socket when the remote multiplexes it.
    pub(crate) fn outbound(&self, media: MediaType, kind: SocketKind) -> Result<(Arc<UdpSocket>, SocketAddr)> {
        let remote = self.remote.read();
        let remote = remote.as_ref().ok_or(SessionError::NotConnected)?;
        let stream = remote.stream(media);
        if !stream.is_present() {
            return Err(SessionError::MediaNotNegotiated { media });
        }

        let (socket_kind, port) = match kind {
            SocketKind::Rtcp if !stream.is_rtcp_muxed() => (SocketKind::Rtcp, stream.rtcp_port),
            _ => (SocketKind::Rtp, stream.port),
        };
        let socket = self
            .sockets
            .get(media, socket_kind)
            .get()
            .ok_or(SessionError::SocketClosed {
                media,
                kind: socket_kind,
            })?;
        Ok((socket, SocketAddr::new(remote.address, port)))
    }

    /// End the session once: cancel tasks, close sockets, notify subscribers
    pub(crate) fn finish(&self, reason: &str) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        let closed = self.sockets.close_all();
        self.reserver.release(self.sockets.ports());
        info!("Call session ended ({}), closed {} socket(s)", reason, closed);

        self.events.publish(SessionEvent::CallEnded {
            reason: reason.to_string(),
        });
        self.events.close();
        self.ended_tx.send_replace(true);
        true
    }

    pub(crate) async fn stop(&self, reason: &str) {
        let dialog = self.agent.dialog();
        if !self.finish(reason) {
            debug!("Call session already stopped");
            return;
        }
        if self.agent.is_call_ended() {
            return;
        }

        match dialog.state {
            DialogState::Connected => self.agent.send_bye().await,
            DialogState::Inviting | DialogState::Ringing if dialog.is_initiator => {
                // The pending invite() fails with 487 once the device confirms
                if let Err(e) = self.agent.cancel().await {
                    debug!("CANCEL of the pending INVITE failed: {}", e);
                }
            }
            _ => {}
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One intercom call: the SIP dialog plus its four media sockets
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    /// Bind the media sockets and start listening on them
    pub async fn new(agent: UserAgent, config: SessionConfig) -> Result<Self> {
        Self::with_reserver(agent, config, Arc::new(PortReserver::new())).await
    }

    /// Like [`new`](Self::new), drawing ports from a shared reserver so
    /// concurrent sessions never race for the same run
    pub async fn with_reserver(agent: UserAgent, config: SessionConfig, reserver: Arc<PortReserver>) -> Result<Self> {
        config.validate()?;
        if agent.is_call_ended() {
            return Err(SessionError::configuration(
                "the user agent's call already ended, reconfigure it before the next call",
            ));
        }

        let cancel = CancellationToken::new();
        let sockets = MediaSockets::bind(config.bind_ip, &reserver, config.bind_attempts, &cancel).await?;
        let (audio_srtp, video_srtp) = if config.srtp {
            (Some(generate_srtp_key()), Some(generate_srtp_key()))
        } else {
            (None, None)
        };
        let rtp_options = sockets.rtp_options(audio_srtp, video_srtp);
        let (ended_tx, _) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            events: SessionEventProcessor::new(config.event_capacity),
            binding: BindingClient::new(config.retransmit()),
            agent,
            config,
            sockets,
            reserver,
            rtp_options,
            local_ice: IceCredentials::generate(),
            responder: RwLock::new(None),
            audio: StreamState::default(),
            video: StreamState::default(),
            remote: RwLock::new(None),
            strategy: RwLock::new(None),
            cancel,
            started: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            ended_tx,
        });

        inner.spawn_receivers();
        spawn_hangup_watcher(&inner);
        debug!("Call session ready on ports {:?}", inner.sockets.ports());
        Ok(Self { inner })
    }

    pub fn agent(&self) -> &UserAgent {
        &self.inner.agent
    }

    /// Local ports and SRTP keys the section builders should advertise
    pub fn rtp_options(&self) -> &RtpOptions {
        &self.inner.rtp_options
    }

    pub fn local_ice_credentials(&self) -> &IceCredentials {
        &self.inner.local_ice
    }

    /// `a=ice-ufrag` and `a=ice-pwd` lines for section builders that offer ICE
    pub fn ice_attributes(&self) -> Vec<String> {
        vec![
            format!("a=ice-ufrag:{}", self.inner.local_ice.ufrag),
            format!("a=ice-pwd:{}", self.inner.local_ice.pwd),
        ]
    }

    /// Place the outbound call and bring up media once the device answers
    pub async fn call(&self, audio: &dyn SectionBuilder, video: &dyn SectionBuilder) -> Result<RtpDescription> {
        self.inner.begin()?;
        let remote = self
            .inner
            .agent
            .invite(&self.inner.rtp_options, audio, video, None)
            .await?;
        self.establish(remote).await
    }

    /// Accept an inbound INVITE and bring up media
    pub async fn answer(
        &self,
        invite: &SipRequest,
        audio: &dyn SectionBuilder,
        video: &dyn SectionBuilder,
    ) -> Result<RtpDescription> {
        self.inner.begin()?;
        let remote = self
            .inner
            .agent
            .invite(&self.inner.rtp_options, audio, video, Some(invite))
            .await?;
        self.establish(remote).await
    }

    async fn establish(&self, remote: RtpDescription) -> Result<RtpDescription> {
        if self.inner.is_ended() {
            // stop() ran while the dialog was being set up; hang the dialog up too
            warn!("Call session stopped during setup, hanging up");
            self.inner.agent.send_bye().await;
            return Err(SessionError::Ended);
        }
        self.inner.connect(remote.clone());
        Ok(remote)
    }

    /// Hang up and release everything. Safe to call repeatedly and before
    /// `call()` completes.
    pub async fn stop(&self) {
        self.inner.stop("local hangup").await;
    }

    pub fn subscribe(&self) -> Result<SessionEventSubscriber> {
        self.inner.events.subscribe()
    }

    /// Send an RTP packet to the remote media endpoint
    pub async fn send_rtp(&self, media: MediaType, packet: &[u8]) -> Result<()> {
        self.send(media, SocketKind::Rtp, packet).await
    }

    /// Send an RTCP packet, over the RTP socket when RTCP is multiplexed
    pub async fn send_rtcp(&self, media: MediaType, packet: &[u8]) -> Result<()> {
        self.send(media, SocketKind::Rtcp, packet).await
    }

    async fn send(&self, media: MediaType, kind: SocketKind, packet: &[u8]) -> Result<()> {
        if self.inner.is_ended() {
            return Err(SessionError::Ended);
        }
        let (socket, destination) = self.inner.outbound(media, kind)?;
        socket.send_to(packet, destination).await?;
        Ok(())
    }

    pub fn health(&self) -> SessionHealth {
        SessionHealth {
            audio: self.inner.audio.health(),
            video: self.inner.video.health(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }

    /// Flag that flips to `true` once when the call ends
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.inner.ended_tx.subscribe()
    }

    pub async fn wait_ended(&self) {
        let mut rx = self.inner.ended_tx.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    pub fn remote_description(&self) -> Option<RtpDescription> {
        self.inner.remote.read().clone()
    }

    pub fn nat_strategy(&self) -> Option<NatStrategy> {
        *self.inner.strategy.read()
    }

    pub fn is_socket_closed(&self, media: MediaType, kind: SocketKind) -> bool {
        self.inner.sockets.get(media, kind).is_closed()
    }

    /// Local ports: audio RTP, audio RTCP, video RTP, video RTCP
    pub fn local_ports(&self) -> &[u16] {
        self.inner.sockets.ports()
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("ports", &self.inner.sockets.ports())
            .field("started", &self.is_started())
            .field("ended", &self.is_ended())
            .field("strategy", &self.nat_strategy())
            .finish()
    }
}

/// End the session without a BYE when the user agent reports the call over
fn spawn_hangup_watcher(inner: &Arc<SessionInner>) {
    let weak = Arc::downgrade(inner);
    let cancel = inner.cancel.clone();
    let mut call_ended = inner.agent.call_ended();

    tokio::spawn(async move {
        let remote_ended = tokio::select! {
            _ = cancel.cancelled() => false,
            changed = call_ended.wait_for(|ended| *ended) => changed.is_ok(),
        };
        if remote_ended {
            if let Some(inner) = weak.upgrade() {
                let reason = if inner.agent.is_transport_lost() {
                    "SIP transport closed"
                } else {
                    "remote ended the call"
                };
                inner.finish(reason);
            }
        }
    });
}
