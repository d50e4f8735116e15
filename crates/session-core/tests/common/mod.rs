//! A scripted intercom device: one SIP socket plus its media sockets

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intercom_dialog_core::{ContactId, DialogResult, InboundRequest, RequestHandler, SipOptions, UserAgent};
use intercom_rtp_core::is_stun_message;
use intercom_session_core::{CallSession, SessionConfig, SessionEvent, SessionEventSubscriber};
use intercom_sip_core::{parse_message, HeaderName, Method, SipMessage, SipRequest, SipResponse, SipUri};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct FakeDevice {
    pub sip: UdpSocket,
    pub addr: SocketAddr,
}

/// Route session and agent logs through the test harness
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("intercom_session_core=debug,intercom_dialog_core=debug")
        .with_test_writer()
        .try_init();
}

impl FakeDevice {
    pub async fn bind() -> Self {
        init_logging();
        let sip = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sip.local_addr().unwrap();
        Self { sip, addr }
    }

    pub fn options(&self) -> SipOptions {
        SipOptions::new(
            "sip:ghome@127.0.0.1",
            format!("sip:door@127.0.0.1:{}", self.addr.port()),
            "127.0.0.1".parse().unwrap(),
        )
    }

    pub async fn agent(&self, options: SipOptions) -> UserAgent {
        UserAgent::new(options, ContactId::new("session01")).await.unwrap()
    }

    pub async fn session(&self, options: SipOptions) -> CallSession {
        CallSession::new(self.agent(options).await, session_config()).await.unwrap()
    }

    pub async fn try_recv(&self, wait: Duration) -> Option<(SipMessage, SocketAddr)> {
        let mut buf = vec![0u8; 65535];
        let (len, from) = tokio::time::timeout(wait, self.sip.recv_from(&mut buf))
            .await
            .ok()?
            .unwrap();
        Some((parse_message(&buf[..len]).unwrap(), from))
    }

    pub async fn recv_request(&self) -> (SipRequest, SocketAddr) {
        match self.try_recv(WAIT).await.expect("device received nothing") {
            (SipMessage::Request(request), from) => (request, from),
            (other, _) => panic!("expected a request, got {:?}", other),
        }
    }

    pub async fn recv_response(&self) -> SipResponse {
        match self.try_recv(WAIT).await.expect("device received nothing") {
            (SipMessage::Response(response), _) => response,
            (other, _) => panic!("expected a response, got {:?}", other),
        }
    }

    pub async fn send(&self, message: impl Into<SipMessage>, to: SocketAddr) {
        let bytes = message.into().to_bytes();
        self.sip.send_to(&bytes, to).await.unwrap();
    }

    pub async fn reply(&self, request: &SipRequest, status: u16, to: SocketAddr) {
        self.send(device_response(request, status), to).await;
    }

    /// Answer an INVITE with 200 and `sdp`, then swallow the ACK
    pub async fn answer(&self, invite: &SipRequest, from: SocketAddr, sdp: String) {
        let ok = device_response(invite, 200)
            .with_header(HeaderName::Contact, format!("<sip:door@{}>", self.addr))
            .with_body("application/sdp", sdp);
        self.send(ok, from).await;
        let (ack, _) = self.recv_request().await;
        assert_eq!(ack.method, Method::Ack);
    }

    /// BYE from the device inside the dialog `invite` opened
    pub fn bye_for(&self, invite: &SipRequest, agent: SocketAddr) -> SipRequest {
        let uri: SipUri = format!("sip:ghome@127.0.0.1:{}", agent.port()).parse().unwrap();
        SipRequest::new(Method::Bye, uri)
            .with_header(HeaderName::Via, format!("SIP/2.0/UDP {};branch=z9hG4bKdevbye", self.addr))
            .with_header(HeaderName::From, "<sip:door@127.0.0.1>;tag=device1")
            .with_header(HeaderName::To, invite.headers.get(HeaderName::From).unwrap().to_string())
            .with_header(HeaderName::CallId, invite.headers.get(HeaderName::CallId).unwrap().to_string())
            .with_header(HeaderName::CSeq, "1 BYE")
    }

    /// INVITE from the device offering `sdp`
    pub fn invite(&self, agent: SocketAddr, call_id: &str, sdp: String) -> SipRequest {
        let uri: SipUri = format!("sip:ghome@127.0.0.1:{}", agent.port()).parse().unwrap();
        SipRequest::new(Method::Invite, uri)
            .with_header(HeaderName::Via, format!("SIP/2.0/UDP {};branch=z9hG4bKdevinv", self.addr))
            .with_header(HeaderName::From, "<sip:door@127.0.0.1>;tag=device1")
            .with_header(HeaderName::To, "<sip:ghome@127.0.0.1>")
            .with_header(HeaderName::CallId, call_id)
            .with_header(HeaderName::CSeq, "1 INVITE")
            .with_header(HeaderName::Contact, format!("<sip:door@{}>", self.addr))
            .with_body("application/sdp", sdp)
    }
}

/// Loopback media with short timers
pub fn session_config() -> SessionConfig {
    SessionConfig::default()
        .with_bind_ip("127.0.0.1".parse().unwrap())
        .with_keepalive_interval(Duration::from_millis(100))
        .with_stun_retransmit(Duration::from_millis(100), 3)
}

pub fn device_response(request: &SipRequest, status: u16) -> SipResponse {
    let mut response = SipResponse::for_request(request, status);
    if let Some(to) = request.headers.get(HeaderName::To) {
        if !to.contains("tag=") {
            response.headers.set(HeaderName::To, format!("{};tag=device1", to));
        }
    }
    response
}

/// One of the device's media sockets
pub struct MediaPeer {
    pub socket: UdpSocket,
    pub addr: SocketAddr,
}

impl MediaPeer {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        Self { socket, addr }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn recv(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = vec![0u8; 2048];
        let (len, from) = tokio::time::timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("media peer received nothing")
            .unwrap();
        buf.truncate(len);
        (buf, from)
    }

    pub async fn recv_stun(&self) -> (Vec<u8>, SocketAddr) {
        loop {
            let (data, from) = self.recv().await;
            if is_stun_message(&data) {
                return (data, from);
            }
        }
    }

    /// Next datagram that is not a STUN keepalive
    pub async fn recv_media(&self) -> (Vec<u8>, SocketAddr) {
        loop {
            let (data, from) = self.recv().await;
            if !is_stun_message(&data) {
                return (data, from);
            }
        }
    }

    pub async fn send_to(&self, data: &[u8], to: SocketAddr) {
        self.socket.send_to(data, to).await.unwrap();
    }
}

/// Session-level SDP with an audio section and an optional video section
pub fn device_sdp(audio: &[String], video: Option<&[String]>) -> String {
    let mut sdp = String::from("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=door\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n");
    for line in audio {
        sdp.push_str(line);
        sdp.push_str("\r\n");
    }
    for line in video.unwrap_or_default() {
        sdp.push_str(line);
        sdp.push_str("\r\n");
    }
    sdp
}

/// Muxed audio and video with a separate RTCP port
pub fn plain_sdp(audio: &MediaPeer, video: &MediaPeer, video_rtcp: &MediaPeer) -> String {
    device_sdp(
        &[format!("m=audio {} RTP/AVP 0", audio.port()), "a=rtcp-mux".to_string()],
        Some(&[
            format!("m=video {} RTP/AVP 96", video.port()),
            format!("a=rtcp:{}", video_rtcp.port()),
        ]),
    )
}

pub fn rtp_packet(payload_type: u8, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0x80, payload_type];
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 1, 0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe]);
    packet
}

/// Receiver report as it appears on a multiplexed socket (PT 201)
pub fn rtcp_packet() -> Vec<u8> {
    vec![0x80, 201, 0x00, 0x01, 0xde, 0xad, 0xbe, 0xef]
}

/// Collect events until the channel closes or nothing arrives for `idle`
pub async fn drain(events: &mut SessionEventSubscriber, idle: Duration) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(idle, events.receive()).await {
        seen.push(event);
    }
    seen
}

/// Handler forwarding every request to a channel
pub struct RecordingHandler {
    pub tx: mpsc::UnboundedSender<InboundRequest>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InboundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl RequestHandler for RecordingHandler {
    async fn handle(&self, request: InboundRequest) -> DialogResult<Option<SipResponse>> {
        let _ = self.tx.send(request);
        Ok(None)
    }
}
