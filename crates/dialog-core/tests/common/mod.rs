//! A scripted intercom device on a loopback UDP socket

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intercom_dialog_core::{
    ContactId, DialogResult, InboundRequest, RequestHandler, SipOptions, UserAgent,
};
use intercom_rtp_core::{LocalStreamOptions, RtpOptions};
use intercom_sip_core::{parse_message, HeaderName, SipMessage, SipRequest, SipResponse};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub const DEVICE_SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=door\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio 50000 RTP/AVP 0\r\n\
a=rtcp-mux\r\n\
m=video 50002 RTP/AVP 96\r\n\
a=DEVADDR:12\r\n";

pub struct FakeDevice {
    pub socket: UdpSocket,
    pub addr: SocketAddr,
}

/// Route agent logs through the test harness; repeated calls are no-ops
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("intercom_dialog_core=debug")
        .with_test_writer()
        .try_init();
}

impl FakeDevice {
    pub async fn bind() -> Self {
        init_logging();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        Self { socket, addr }
    }

    /// Options for an agent on 127.0.0.1 calling this device
    pub fn options(&self) -> SipOptions {
        SipOptions::new(
            "sip:ghome@127.0.0.1",
            format!("sip:door@127.0.0.1:{}", self.addr.port()),
            "127.0.0.1".parse().unwrap(),
        )
    }

    pub async fn agent(&self, options: SipOptions) -> UserAgent {
        UserAgent::new(options, ContactId::new("test01")).await.unwrap()
    }

    pub async fn recv(&self) -> (SipMessage, SocketAddr) {
        self.try_recv(Duration::from_secs(2))
            .await
            .expect("device received nothing")
    }

    pub async fn try_recv(&self, wait: Duration) -> Option<(SipMessage, SocketAddr)> {
        let mut buf = vec![0u8; 65535];
        let (len, from) = tokio::time::timeout(wait, self.socket.recv_from(&mut buf))
            .await
            .ok()?
            .unwrap();
        Some((parse_message(&buf[..len]).unwrap(), from))
    }

    pub async fn recv_request(&self) -> (SipRequest, SocketAddr) {
        match self.recv().await {
            (SipMessage::Request(request), from) => (request, from),
            (other, _) => panic!("expected a request, got {:?}", other),
        }
    }

    pub async fn recv_response(&self) -> SipResponse {
        match self.recv().await {
            (SipMessage::Response(response), _) => response,
            (other, _) => panic!("expected a response, got {:?}", other),
        }
    }

    pub async fn send(&self, message: impl Into<SipMessage>, to: SocketAddr) {
        let bytes = message.into().to_bytes();
        self.socket.send_to(&bytes, to).await.unwrap();
    }

    /// Answer `request` with `status`, adding a To tag
    pub async fn reply(&self, request: &SipRequest, status: u16, to: SocketAddr) -> SipResponse {
        let response = device_response(request, status);
        self.send(response.clone(), to).await;
        response
    }
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

pub fn rtp_options() -> RtpOptions {
    RtpOptions {
        audio: LocalStreamOptions {
            port: 40000,
            rtcp_port: 40001,
            srtp: None,
        },
        video: LocalStreamOptions {
            port: 40002,
            rtcp_port: 40003,
            srtp: None,
        },
    }
}

/// Handler forwarding every request to a channel
pub struct RecordingHandler {
    pub tx: mpsc::UnboundedSender<InboundRequest>,
    /// Status used to answer INVITEs; `None` leaves them to the test
    pub invite_status: Option<u16>,
}

impl RecordingHandler {
    pub fn new(invite_status: Option<u16>) -> (Arc<Self>, mpsc::UnboundedReceiver<InboundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, invite_status }), rx)
    }
}

#[async_trait]
impl RequestHandler for RecordingHandler {
    async fn handle(&self, request: InboundRequest) -> DialogResult<Option<SipResponse>> {
        let response = match (&request, self.invite_status) {
            (InboundRequest::Invite(invite), Some(status)) => Some(SipResponse::for_request(invite, status)),
            _ => None,
        };
        let _ = self.tx.send(request);
        Ok(response)
    }
}
