//! NAT traversal for the media sockets
//!
//! Devices that advertise ICE credentials get authenticated connectivity
//! checks and answers to their own checks. Everything else gets a plain
//! STUN binding request on a fixed interval, which keeps NAT bindings open
//! and doubles as liveness towards the device.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use intercom_ice_core::{send_binding_request, IceCredentials, StunResponder};
use intercom_rtp_core::{MediaType, RtpDescription};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::session::{SessionInner, MEDIA_TYPES};
use crate::manager::SessionEvent;
use crate::media::SocketKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatStrategy {
    /// Full ICE: responders plus one authenticated check per socket
    Ice,
    /// Unauthenticated binding requests on an interval
    StunKeepalive,
}

impl NatStrategy {
    /// ICE as soon as either media carries remote credentials
    pub fn for_description(remote: &RtpDescription) -> Self {
        if remote.uses_ice() {
            NatStrategy::Ice
        } else {
            NatStrategy::StunKeepalive
        }
    }
}

impl fmt::Display for NatStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatStrategy::Ice => f.write_str("ICE"),
            NatStrategy::StunKeepalive => f.write_str("STUN keepalive"),
        }
    }
}

/// One STUN destination: the local socket and the remote endpoint it talks to
struct StunTarget {
    media: MediaType,
    kind: SocketKind,
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
}

impl SessionInner {
    /// RTP of every offered media, plus RTCP where it is not multiplexed
    fn stun_targets(&self) -> Vec<StunTarget> {
        let mut targets = Vec::new();
        for media in MEDIA_TYPES {
            let muxed = match self.remote.read().as_ref() {
                Some(remote) => remote.stream(media).is_rtcp_muxed(),
                None => return targets,
            };
            for kind in [SocketKind::Rtp, SocketKind::Rtcp] {
                if kind == SocketKind::Rtcp && muxed {
                    continue;
                }
                match self.outbound(media, kind) {
                    Ok((socket, destination)) => targets.push(StunTarget {
                        media,
                        kind,
                        socket,
                        destination,
                    }),
                    Err(e) => trace!("No STUN target for {} {}: {}", media, kind, e),
                }
            }
        }
        targets
    }

    fn remote_ice_credentials(&self, media: MediaType) -> Option<IceCredentials> {
        let remote = self.remote.read();
        let (ufrag, pwd) = remote.as_ref()?.stream(media).ice_credentials()?;
        Some(IceCredentials::new(ufrag, pwd))
    }

    pub(crate) fn start_ice(self: &Arc<Self>) {
        *self.responder.write() = Some(StunResponder::new(Some(self.local_ice.clone())));
        let tiebreaker: u64 = rand::random();

        for target in self.stun_targets() {
            let weak = Arc::downgrade(self);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = inner.check_connectivity(target, tiebreaker) => {}
                }
            });
        }
    }

    /// Authenticated check when this media has credentials, a bare request otherwise.
    ///
    /// Failures are logged; they never end the session.
    async fn check_connectivity(&self, target: StunTarget, tiebreaker: u64) {
        let StunTarget {
            media,
            kind,
            socket,
            destination,
        } = target;

        let Some(remote) = self.remote_ice_credentials(media) else {
            if let Err(e) = send_binding_request(&socket, destination).await {
                debug!("STUN binding request to {} failed: {}", destination, e);
            }
            return;
        };

        match self
            .binding
            .connectivity_check(&socket, destination, &remote, &self.local_ice.ufrag, tiebreaker)
            .await
        {
            Ok(mapped) => self
                .events
                .publish(SessionEvent::ConnectivityEstablished { media, kind, mapped }),
            Err(e) => warn!("{} {} connectivity check to {} failed: {}", media, kind, destination, e),
        }
    }

    pub(crate) fn start_keepalive(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.config.keepalive_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.send_keepalives().await;
            }
            trace!("STUN keepalive stopped");
        });
    }

    async fn send_keepalives(&self) {
        for target in self.stun_targets() {
            if let Err(e) = send_binding_request(&target.socket, target.destination).await {
                debug!(
                    "STUN keepalive on {} {} to {} failed: {}",
                    target.media, target.kind, target.destination, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intercom_rtp_core::parse_rtp_description;

    const PLAIN: &str = "v=0\r\nc=IN IP4 10.0.0.7\r\nt=0 0\r\nm=audio 5000 RTP/AVP 0\r\nm=video 5002 RTP/AVP 96\r\n";

    #[test]
    fn test_plain_description_uses_keepalive() {
        let remote = parse_rtp_description(PLAIN).unwrap();
        assert_eq!(NatStrategy::for_description(&remote), NatStrategy::StunKeepalive);
    }

    #[test]
    fn test_credentials_on_either_media_select_ice() {
        let video_only = format!("{}a=ice-ufrag:abcd\r\na=ice-pwd:0123456789abcdefghijkl\r\n", PLAIN);
        let remote = parse_rtp_description(&video_only).unwrap();
        assert!(remote.audio.ice_credentials().is_none());
        assert_eq!(NatStrategy::for_description(&remote), NatStrategy::Ice);
    }

    #[test]
    fn test_half_credentials_are_not_ice() {
        let ufrag_only = format!("{}a=ice-ufrag:abcd\r\n", PLAIN);
        let remote = parse_rtp_description(&ufrag_only).unwrap();
        assert_eq!(NatStrategy::for_description(&remote), NatStrategy::StunKeepalive);
    }
}
