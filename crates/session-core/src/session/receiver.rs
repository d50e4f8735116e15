//! Per-socket receive loops
//!
//! Every datagram is classified before it is routed: STUN goes to the
//! binding client or the responder, RTP-range payload types feed the
//! sequence tracker and the RTP event, everything else is RTCP.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use intercom_ice_core::StunMessage;
use intercom_rtp_core::{get_payload_type, is_rtp_message_payload_type, is_stun_message};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use super::session::SessionInner;
use crate::manager::SessionEvent;
use crate::media::{MediaSocket, SocketKind};

const RECEIVE_BUFFER_SIZE: usize = 65536;

/// Shortest datagram routed as media; an RTP or RTCP header needs at least this
const MIN_MEDIA_LEN: usize = 4;

impl SessionInner {
    pub(crate) fn spawn_receivers(self: &Arc<Self>) {
        for socket in self.sockets.all() {
            tokio::spawn(receive_loop(Arc::downgrade(self), Arc::clone(socket)));
        }
    }

    async fn route_packet(&self, socket: &MediaSocket, udp: &UdpSocket, data: &[u8], from: SocketAddr) {
        if is_stun_message(data) {
            self.handle_stun(udp, data, from).await;
            return;
        }
        if data.len() < MIN_MEDIA_LEN {
            trace!("Dropping {} byte datagram from {}", data.len(), from);
            return;
        }

        let media = socket.media();
        let stream = self.stream_state(media);
        let packet = Bytes::copy_from_slice(data);

        if socket.kind() == SocketKind::Rtp {
            if !stream.latched.swap(true, Ordering::AcqRel) {
                self.events.publish(SessionEvent::StreamLatched { media, from });
            }
            if is_rtp_message_payload_type(get_payload_type(data)) {
                stream.tracker.lock().record_packet(data);
                self.events.publish(SessionEvent::RtpPacket { media, packet });
                return;
            }
        }

        stream.rtcp_packets.fetch_add(1, Ordering::Relaxed);
        self.events.publish(SessionEvent::RtcpPacket { media, packet });
    }

    async fn handle_stun(&self, udp: &UdpSocket, data: &[u8], from: SocketAddr) {
        let message = match StunMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring undecodable STUN message from {}: {}", from, e);
                return;
            }
        };

        if message.msg_type.is_response() {
            self.binding.handle_response(message);
            return;
        }

        let response = match self.responder.read().as_ref() {
            Some(responder) => responder.response_for(&message, from),
            None => {
                trace!("No STUN responder, ignoring request from {}", from);
                return;
            }
        };
        if let Some(response) = response {
            if let Err(e) = udp.send_to(&response, from).await {
                debug!("Failed to answer STUN request from {}: {}", from, e);
            }
        }
    }

    /// A media socket failed; tear the call down as if stopped locally
    fn socket_failed(self: Arc<Self>, socket: &MediaSocket, error: io::Error) {
        warn!("{} {} socket failed: {}", socket.media(), socket.kind(), error);
        tokio::spawn(async move {
            self.stop("media transport failure").await;
        });
    }
}

async fn receive_loop(session: Weak<SessionInner>, socket: Arc<MediaSocket>) {
    let Some(udp) = socket.get() else {
        return;
    };
    let cancel = socket.token();
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = udp.recv_from(&mut buf) => received,
        };
        let Some(inner) = session.upgrade() else {
            break;
        };

        match received {
            Ok((len, from)) => inner.route_packet(&socket, &udp, &buf[..len], from).await,
            // ICMP port unreachable for an earlier send on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                trace!("Ignoring connection reset on {} {} socket", socket.media(), socket.kind());
            }
            Err(e) => {
                inner.socket_failed(&socket, e);
                break;
            }
        }
    }
    trace!("{} {} receive loop on {} exited", socket.media(), socket.kind(), socket.local_addr());
}
