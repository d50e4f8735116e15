//! The four media sockets of a call session
//!
//! Audio RTP, audio RTCP, video RTP and video RTCP are bound on a run of
//! four consecutive ports in that order, because downstream tooling assumes
//! RTCP sits right above RTP. Each socket lives in a close-once slot: when
//! the remote multiplexes RTCP onto the RTP port the dedicated RTCP socket
//! is closed early, and whatever is left is closed by `stop()`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use intercom_rtp_core::{LocalStreamOptions, MediaType, PortReserver, PortType, RtpOptions, SrtpKeyMaterial};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{Result, SessionError};

/// Which half of a media stream a socket carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Rtp,
    Rtcp,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Rtp => f.write_str("RTP"),
            SocketKind::Rtcp => f.write_str("RTCP"),
        }
    }
}

/// A UDP socket that can be closed exactly once.
///
/// Closing empties the slot and cancels the socket's token, which stops its
/// receive loop; the socket itself is released once the last in-flight send
/// drops its handle.
pub struct MediaSocket {
    media: MediaType,
    kind: SocketKind,
    local_addr: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    cancel: CancellationToken,
}

impl MediaSocket {
    pub fn new(media: MediaType, kind: SocketKind, socket: UdpSocket, parent: &CancellationToken) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            media,
            kind,
            local_addr,
            socket: RwLock::new(Some(Arc::new(socket))),
            cancel: parent.child_token(),
        })
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The socket, unless closed
    pub fn get(&self) -> Option<Arc<UdpSocket>> {
        self.socket.read().clone()
    }

    /// Close the socket; only the first call returns true
    pub fn close(&self) -> bool {
        let closed = self.socket.write().take().is_some();
        if closed {
            self.cancel.cancel();
            trace!("Closed {} {} socket on {}", self.media, self.kind, self.local_addr);
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.socket.read().is_none()
    }

    /// Token cancelled when this socket closes or the session ends
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl fmt::Debug for MediaSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSocket")
            .field("media", &self.media)
            .field("kind", &self.kind)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The sockets of one session, bound on consecutive ports
#[derive(Debug)]
pub struct MediaSockets {
    audio_rtp: Arc<MediaSocket>,
    audio_rtcp: Arc<MediaSocket>,
    video_rtp: Arc<MediaSocket>,
    video_rtcp: Arc<MediaSocket>,
    ports: Vec<u16>,
}

impl MediaSockets {
    /// Reserve four consecutive ports and bind them.
    ///
    /// The reservation only proves the ports were free a moment ago, so a
    /// failed bind releases the run and starts over, up to `attempts` times.
    pub async fn bind(
        ip: IpAddr,
        reserver: &PortReserver,
        attempts: usize,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut last_error = None;
        for attempt in 1..=attempts {
            let ports = reserver.reserve_ports(4, PortType::Udp)?;
            match Self::bind_ports(ip, &ports, cancel).await {
                Ok(sockets) => return Ok(sockets),
                Err(e) => {
                    debug!("Binding media ports {:?} failed on attempt {}: {}", ports, attempt, e);
                    reserver.release(&ports);
                    last_error = Some(e);
                }
            }
        }
        warn!("Unable to bind media sockets after {} attempt(s)", attempts);
        Err(last_error.unwrap_or_else(|| SessionError::configuration("no bind attempts configured")))
    }

    /// Bind exactly these ports: audio RTP, audio RTCP, video RTP, video RTCP
    pub async fn bind_ports(ip: IpAddr, ports: &[u16], cancel: &CancellationToken) -> Result<Self> {
        let &[audio_rtp, audio_rtcp, video_rtp, video_rtcp] = ports else {
            return Err(SessionError::configuration(format!(
                "expected 4 media ports, got {}",
                ports.len()
            )));
        };

        let sockets = Self {
            audio_rtp: bind_one(ip, audio_rtp, MediaType::Audio, SocketKind::Rtp, cancel).await?,
            audio_rtcp: bind_one(ip, audio_rtcp, MediaType::Audio, SocketKind::Rtcp, cancel).await?,
            video_rtp: bind_one(ip, video_rtp, MediaType::Video, SocketKind::Rtp, cancel).await?,
            video_rtcp: bind_one(ip, video_rtcp, MediaType::Video, SocketKind::Rtcp, cancel).await?,
            ports: ports.to_vec(),
        };
        debug!("Media sockets bound on {} ports {:?}", ip, ports);
        Ok(sockets)
    }

    pub fn get(&self, media: MediaType, kind: SocketKind) -> &Arc<MediaSocket> {
        match (media, kind) {
            (MediaType::Audio, SocketKind::Rtp) => &self.audio_rtp,
            (MediaType::Audio, SocketKind::Rtcp) => &self.audio_rtcp,
            (MediaType::Video, SocketKind::Rtp) => &self.video_rtp,
            (MediaType::Video, SocketKind::Rtcp) => &self.video_rtcp,
        }
    }

    pub fn all(&self) -> [&Arc<MediaSocket>; 4] {
        [&self.audio_rtp, &self.audio_rtcp, &self.video_rtp, &self.video_rtcp]
    }

    /// Ports in binding order
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Close every socket still open; returns how many were
    pub fn close_all(&self) -> usize {
        self.all().iter().filter(|socket| socket.close()).count()
    }

    /// Local endpoints to advertise, with optional SRTP keys per media
    pub fn rtp_options(&self, audio_srtp: Option<SrtpKeyMaterial>, video_srtp: Option<SrtpKeyMaterial>) -> RtpOptions {
        RtpOptions {
            audio: LocalStreamOptions {
                port: self.audio_rtp.local_addr().port(),
                rtcp_port: self.audio_rtcp.local_addr().port(),
                srtp: audio_srtp,
            },
            video: LocalStreamOptions {
                port: self.video_rtp.local_addr().port(),
                rtcp_port: self.video_rtcp.local_addr().port(),
                srtp: video_srtp,
            },
        }
    }
}

async fn bind_one(
    ip: IpAddr,
    port: u16,
    media: MediaType,
    kind: SocketKind,
    cancel: &CancellationToken,
) -> Result<Arc<MediaSocket>> {
    let socket = UdpSocket::bind(SocketAddr::new(ip, port)).await?;
    Ok(Arc::new(MediaSocket::new(media, kind, socket, cancel)?))
}
