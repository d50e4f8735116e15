//! Call sessions against a scripted device on loopback

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{
    device_sdp, drain, plain_sdp, rtcp_packet, rtp_packet, session_config, FakeDevice, MediaPeer, RecordingHandler,
    WAIT,
};
use intercom_dialog_core::{
    default_audio_section, default_video_section, ContactId, DialogError, InboundRequest, SipOptions, UserAgent,
};
use intercom_ice_core::{IceCredentials, StunMessage, StunResponder};
use intercom_rtp_core::MediaType;
use intercom_session_core::{CallSession, NatStrategy, SessionError, SessionEvent, SocketKind};
use intercom_sip_core::{HeaderAccess, Method, SipRequest};
use intercom_sip_transport::TransportType;
use serial_test::serial;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

struct Peers {
    audio: MediaPeer,
    video: MediaPeer,
    video_rtcp: MediaPeer,
}

impl Peers {
    async fn bind() -> Self {
        Self {
            audio: MediaPeer::bind().await,
            video: MediaPeer::bind().await,
            video_rtcp: MediaPeer::bind().await,
        }
    }
}

fn local(session: &CallSession, index: usize) -> SocketAddr {
    SocketAddr::new("127.0.0.1".parse().unwrap(), session.local_ports()[index])
}

/// Place a call and let the device answer with `sdp`
async fn connect(device: &FakeDevice, session: &CallSession, sdp: String) -> SipRequest {
    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call(&default_audio_section, &default_video_section).await }
    });

    let (invite, from) = device.recv_request().await;
    assert_eq!(invite.method, Method::Invite);
    device.answer(&invite, from, sdp).await;
    call.await.unwrap().unwrap();
    invite
}

#[tokio::test]
async fn test_muxed_rtcp_collapses_onto_rtp_socket() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let session = device.session(device.options()).await;

    let ports = session.local_ports().to_vec();
    assert!(ports.windows(2).all(|w| w[1] == w[0] + 1));

    connect(&device, &session, plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp)).await;

    assert!(session.is_socket_closed(MediaType::Audio, SocketKind::Rtcp));
    assert!(!session.is_socket_closed(MediaType::Audio, SocketKind::Rtp));
    assert!(!session.is_socket_closed(MediaType::Video, SocketKind::Rtcp));
    assert_eq!(session.nat_strategy(), Some(NatStrategy::StunKeepalive));

    // Keepalives reach audio RTP and the separate video RTCP endpoint
    let (_, from) = peers.audio.recv_stun().await;
    assert_eq!(from, local(&session, 0));
    let (_, from) = peers.video_rtcp.recv_stun().await;
    assert_eq!(from, local(&session, 3));

    // Audio RTCP now leaves through the RTP socket
    session.send_rtcp(MediaType::Audio, &rtcp_packet()).await.unwrap();
    let (data, from) = peers.audio.recv_media().await;
    assert_eq!(data, rtcp_packet());
    assert_eq!(from, local(&session, 0));

    session.send_rtcp(MediaType::Video, &rtcp_packet()).await.unwrap();
    let (_, from) = peers.video_rtcp.recv_media().await;
    assert_eq!(from, local(&session, 3));

    session.send_rtp(MediaType::Video, &rtp_packet(96, 1)).await.unwrap();
    let (data, from) = peers.video.recv_media().await;
    assert_eq!(data, rtp_packet(96, 1));
    assert_eq!(from, local(&session, 2));

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (bye, from) = device.recv_request().await;
    device.reply(&bye, 200, from).await;
    stopping.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_keepalive_repeats_on_interval() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let session = device.session(device.options()).await;
    connect(&device, &session, plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp)).await;

    let first = StunMessage::decode(&peers.audio.recv_stun().await.0).unwrap();
    let second = StunMessage::decode(&peers.audio.recv_stun().await.0).unwrap();
    assert_ne!(first.transaction_id, second.transaction_id);
    // Plain keepalives carry no credentials
    assert!(first.username().is_none());

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (bye, from) = device.recv_request().await;
    device.reply(&bye, 200, from).await;
    stopping.await.unwrap();
}

#[tokio::test]
async fn test_stop_twice_sends_one_bye_and_one_end() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let session = device.session(device.options()).await;
    let mut events = session.subscribe().unwrap();
    connect(&device, &session, plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp)).await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });

    let (bye, from) = device.recv_request().await;
    assert_eq!(bye.method, Method::Bye);
    device.reply(&bye, 200, from).await;
    first.await.unwrap();
    second.await.unwrap();
    session.stop().await;

    assert!(device.try_recv(Duration::from_millis(300)).await.is_none());
    assert!(session.is_ended());
    for media in [MediaType::Audio, MediaType::Video] {
        assert!(session.is_socket_closed(media, SocketKind::Rtp));
        assert!(session.is_socket_closed(media, SocketKind::Rtcp));
    }

    let seen = drain(&mut events, Duration::from_millis(300)).await;
    let ended = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::CallEnded { .. }))
        .count();
    assert_eq!(ended, 1);
    assert!(matches!(seen.last(), Some(SessionEvent::CallEnded { .. })));

    assert!(matches!(session.send_rtp(MediaType::Audio, &rtp_packet(0, 1)).await, Err(SessionError::Ended)));
}

#[tokio::test]
async fn test_remote_bye_ends_session_without_local_bye() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let session = device.session(device.options()).await;
    let mut events = session.subscribe().unwrap();
    let invite = connect(&device, &session, plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp)).await;

    let agent_addr = session.agent().local_addr();
    device.send(device.bye_for(&invite, agent_addr), agent_addr).await;
    assert_eq!(device.recv_response().await.status, 200);

    tokio::time::timeout(WAIT, session.wait_ended()).await.unwrap();
    assert!(session.is_socket_closed(MediaType::Audio, SocketKind::Rtp));

    // Nothing left to hang up
    session.stop().await;
    assert!(device.try_recv(Duration::from_millis(300)).await.is_none());

    let seen = drain(&mut events, Duration::from_millis(300)).await;
    match seen.last() {
        Some(SessionEvent::CallEnded { reason }) => assert!(reason.contains("remote")),
        other => panic!("expected the call end, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_latch_and_health() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let session = device.session(device.options()).await;
    let mut events = session.subscribe().unwrap();
    connect(&device, &session, plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp)).await;

    // Too short to be media: dropped without latching video
    peers.video.send_to(&[0x80, 0x00], local(&session, 2)).await;

    let audio_rtp = local(&session, 0);
    for sequence in [1u16, 2, 4] {
        peers.audio.send_to(&rtp_packet(0, sequence), audio_rtp).await;
    }
    peers.audio.send_to(&rtcp_packet(), audio_rtp).await;
    peers.video_rtcp.send_to(&rtcp_packet(), local(&session, 3)).await;

    let mut latched = Vec::new();
    let mut rtp = Vec::new();
    let mut rtcp = Vec::new();
    while rtp.len() < 3 || rtcp.len() < 2 {
        match tokio::time::timeout(WAIT, events.receive()).await.unwrap().unwrap() {
            SessionEvent::StreamLatched { media, from } => latched.push((media, from)),
            SessionEvent::RtpPacket { media, packet } => rtp.push((media, packet)),
            SessionEvent::RtcpPacket { media, .. } => rtcp.push(media),
            other => panic!("unexpected {:?}", other),
        }
    }

    assert_eq!(latched, vec![(MediaType::Audio, peers.audio.addr)]);
    assert!(rtp.iter().all(|(media, _)| *media == MediaType::Audio));
    assert_eq!(rtp[2].1.as_ref(), rtp_packet(0, 4).as_slice());
    rtcp.sort_by_key(|media| media.as_str());
    assert_eq!(rtcp, vec![MediaType::Audio, MediaType::Video]);

    let health = session.health();
    assert!(health.audio.latched);
    assert_eq!(health.audio.packets, 3);
    assert_eq!(health.audio.lost, 1);
    assert_eq!(health.audio.rtcp_packets, 1);
    assert!(!health.video.latched);
    assert_eq!(health.video.rtcp_packets, 1);

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (bye, from) = device.recv_request().await;
    device.reply(&bye, 200, from).await;
    stopping.await.unwrap();
}

#[tokio::test]
async fn test_ice_check_and_responder() {
    const DEVICE_UFRAG: &str = "doorufrag";
    const DEVICE_PWD: &str = "doorbellpassword1234567890";

    let device = FakeDevice::bind().await;
    let audio = MediaPeer::bind().await;
    let session = device.session(device.options()).await;
    let mut events = session.subscribe().unwrap();

    let sdp = device_sdp(
        &[
            format!("m=audio {} RTP/AVP 0", audio.port()),
            "a=rtcp-mux".to_string(),
            format!("a=ice-ufrag:{}", DEVICE_UFRAG),
            format!("a=ice-pwd:{}", DEVICE_PWD),
        ],
        None,
    );
    connect(&device, &session, sdp).await;
    assert_eq!(session.nat_strategy(), Some(NatStrategy::Ice));
    assert_eq!(session.remote_description().unwrap().video.port, 0);

    // Authenticated check from the audio RTP socket
    let (raw, from) = audio.recv_stun().await;
    assert_eq!(from, local(&session, 0));
    let check = StunMessage::decode(&raw).unwrap();
    let expected_username = format!("{}:{}", DEVICE_UFRAG, session.local_ice_credentials().ufrag);
    assert_eq!(check.username(), Some(expected_username.as_str()));
    tokio_test::assert_ok!(StunMessage::verify_integrity(&raw, DEVICE_PWD.as_bytes()));

    let device_responder = StunResponder::new(Some(IceCredentials::new(DEVICE_UFRAG, DEVICE_PWD)));
    let answer = device_responder.response_for(&check, from).unwrap();
    audio.send_to(&answer, from).await;

    loop {
        match tokio::time::timeout(WAIT, events.receive()).await.unwrap().unwrap() {
            SessionEvent::ConnectivityEstablished { media, kind, mapped } => {
                assert_eq!((media, kind), (MediaType::Audio, SocketKind::Rtp));
                assert_eq!(mapped, Some(local(&session, 0)));
                break;
            }
            _ => continue,
        }
    }

    // The device's own check is answered with its observed address
    let request = StunMessage::binding_request();
    audio.send_to(&request.encode(), local(&session, 0)).await;
    loop {
        let (raw, _) = audio.recv_stun().await;
        let message = StunMessage::decode(&raw).unwrap();
        if message.msg_type.is_response() && message.transaction_id == request.transaction_id {
            assert_eq!(message.xor_mapped_address(), Some(audio.addr));
            break;
        }
    }

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (bye, from) = device.recv_request().await;
    device.reply(&bye, 200, from).await;
    stopping.await.unwrap();
}

#[tokio::test]
async fn test_second_call_rejected_and_stop_cancels_pending_invite() {
    let device = FakeDevice::bind().await;
    let session = device.session(device.options()).await;

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call(&default_audio_section, &default_video_section).await }
    });
    let (invite, from) = device.recv_request().await;
    assert!(session.is_started());
    assert!(matches!(
        session.call(&default_audio_section, &default_video_section).await,
        Err(SessionError::AlreadyStarted)
    ));

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (cancel, cancel_from) = device.recv_request().await;
    assert_eq!(cancel.method, Method::Cancel);
    assert_eq!(cancel.seq(), invite.seq());
    device.reply(&cancel, 200, cancel_from).await;
    device.reply(&invite, 487, from).await;

    stopping.await.unwrap();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(487));

    // Ended sessions stay ended
    assert!(matches!(
        session.call(&default_audio_section, &default_video_section).await,
        Err(SessionError::Ended)
    ));
}

#[tokio::test]
async fn test_answer_inbound_invite() {
    let device = FakeDevice::bind().await;
    let peers = Peers::bind().await;
    let (handler, mut requests) = RecordingHandler::new();
    let session = device.session(device.options().with_handler(handler)).await;
    let agent_addr = session.agent().local_addr();

    let offer = device.invite(agent_addr, "inbound-1", plain_sdp(&peers.audio, &peers.video, &peers.video_rtcp));
    device.send(offer, agent_addr).await;
    assert_eq!(device.recv_response().await.status, 100);

    let InboundRequest::Invite(invite) = requests.recv().await.unwrap() else {
        panic!("expected the INVITE");
    };
    session.agent().send_ringing(&invite).await.unwrap();
    assert_eq!(device.recv_response().await.status, 180);

    let remote = session
        .answer(&invite, &default_audio_section, &default_video_section)
        .await
        .unwrap();
    assert_eq!(remote.audio.port, peers.audio.port());
    assert_eq!(remote.video.rtcp_port, peers.video_rtcp.port());

    let ok = device.recv_response().await;
    assert_eq!(ok.status, 200);
    assert!(ok
        .body_str()
        .unwrap()
        .contains(&format!("m=audio {}", session.local_ports()[0])));
    assert!(session.is_socket_closed(MediaType::Audio, SocketKind::Rtcp));

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    let (bye, from) = device.recv_request().await;
    assert_eq!(bye.method, Method::Bye);
    assert_eq!(bye.call_id(), Some("inbound-1"));
    device.reply(&bye, 200, from).await;
    stopping.await.unwrap();
}

#[tokio::test]
async fn test_sip_transport_loss_during_invite_cleans_up() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = SipOptions::new(
        "sip:ghome@127.0.0.1",
        format!("sip:door@{}", listener.local_addr().unwrap()),
        "127.0.0.1".parse().unwrap(),
    )
    .with_transport(TransportType::Tcp);
    let (agent, accepted) = tokio::join!(UserAgent::new(options, ContactId::new("session01")), listener.accept());
    let (mut stream, _) = accepted.unwrap();
    let session = CallSession::new(agent.unwrap(), session_config()).await.unwrap();
    let mut events = session.subscribe().unwrap();

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call(&default_audio_section, &default_video_section).await }
    });

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while !String::from_utf8_lossy(&received).contains("\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "agent closed the connection first");
        received.extend_from_slice(&buf[..n]);
    }
    assert!(received.starts_with(b"INVITE "));
    drop(stream);

    let err = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .expect("call still pending after the SIP connection dropped")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::Dialog(DialogError::Transport(_))));

    tokio::time::timeout(WAIT, session.wait_ended())
        .await
        .expect("session not cleaned up after transport loss");
    for media in [MediaType::Audio, MediaType::Video] {
        assert!(session.is_socket_closed(media, SocketKind::Rtp));
        assert!(session.is_socket_closed(media, SocketKind::Rtcp));
    }

    match tokio::time::timeout(WAIT, events.receive()).await.unwrap() {
        Ok(SessionEvent::CallEnded { reason }) => assert_eq!(reason, "SIP transport closed"),
        other => panic!("expected CallEnded, got {:?}", other),
    }

    // stop() after the loss is a no-op and sends nothing
    session.stop().await;
    assert!(session.is_ended());
}
