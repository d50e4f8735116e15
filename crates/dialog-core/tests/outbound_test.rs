//! Outbound transactions against a scripted device

mod common;

use std::time::{Duration, Instant};

use common::{device_response, rtp_options, FakeDevice, DEVICE_SDP};
use intercom_dialog_core::{
    default_audio_section, default_video_section, ContactId, DialogError, DialogState, SipOptions, UserAgent,
};
use intercom_sip_core::{HeaderAccess, HeaderName, Method};
use intercom_sip_transport::TransportType;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use serial_test::serial;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_invite_is_acknowledged_once_with_same_cseq() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let caller = agent.clone();
    let call = tokio::spawn(async move {
        caller
            .invite(&rtp_options(), &default_audio_section, &default_video_section, None)
            .await
    });

    let (invite, from) = device.recv_request().await;
    assert_eq!(invite.method, Method::Invite);
    assert_eq!(invite.content_type(), Some("application/sdp"));
    assert!(invite.body_str().unwrap().contains("m=audio 40000"));
    assert!(invite.headers.get(HeaderName::Contact).is_some());

    device.send(device_response(&invite, 100), from).await;
    device.send(device_response(&invite, 180), from).await;
    let ok = device_response(&invite, 200)
        .with_header(HeaderName::Contact, format!("<sip:door@{}>", device.addr))
        .with_body("application/sdp", DEVICE_SDP);
    device.send(ok.clone(), from).await;

    let (ack, _) = device.recv_request().await;
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(ack.seq(), invite.seq());
    assert_eq!(ack.call_id(), invite.call_id());
    assert_eq!(ack.to_tag().as_deref(), Some("device1"));
    assert_ne!(ack.branch(), invite.branch());

    let description = call.await.unwrap().unwrap();
    assert_eq!(description.address.to_string(), "127.0.0.1");
    assert_eq!(description.audio.port, 50000);
    assert_eq!(description.audio.rtcp_port, 50000);
    assert_eq!(description.video.rtcp_port, 50003);
    assert!(description.sdp.contains("a=DEVADDR:12"));
    assert_eq!(agent.dialog_state(), DialogState::Connected);

    // No second ACK for the same response
    assert!(device.try_recv(Duration::from_millis(300)).await.is_none());

    // A retransmitted 2xx is answered with the stored ACK
    device.send(ok, from).await;
    let (again, _) = device.recv_request().await;
    assert_eq!(again.method, Method::Ack);
    assert_eq!(again.seq(), invite.seq());
}

#[tokio::test]
async fn test_invite_failure_is_acknowledged_and_surfaced() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let caller = agent.clone();
    let call = tokio::spawn(async move {
        caller
            .invite(&rtp_options(), &default_audio_section, &default_video_section, None)
            .await
    });

    let (invite, from) = device.recv_request().await;
    device.reply(&invite, 486, from).await;

    let (ack, _) = device.recv_request().await;
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(ack.branch(), invite.branch());

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(486));
    assert_eq!(agent.dialog_state(), DialogState::Ended);
}

#[tokio::test]
#[serial]
async fn test_register_resolves_without_response() {
    let device = FakeDevice::bind().await;
    let agent = device
        .agent(device.options().with_register_timeout(Duration::from_millis(300)))
        .await;

    let started = Instant::now();
    let registering = tokio::spawn({
        let agent = agent.clone();
        async move { agent.register().await }
    });

    let (register, _) = device.recv_request().await;
    assert_eq!(register.method, Method::Register);
    let contact = register.contact().unwrap();
    assert_eq!(contact.param("expires"), Some(Some("300")));

    assert_ok!(registering.await.unwrap());
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_register_applies_domain_and_gruu() {
    let device = FakeDevice::bind().await;
    let agent = device
        .agent(
            device
                .options()
                .with_domain("vendor.example")
                .with_gruu_instance_id("0d3c1d4e")
                .with_lease(0),
        )
        .await;

    let registering = tokio::spawn({
        let agent = agent.clone();
        async move { agent.register().await }
    });

    let (register, from) = device.recv_request().await;
    assert_eq!(register.uri.to_string(), "sip:vendor.example");
    assert_eq!(register.from_address().unwrap().uri.host, "vendor.example");
    assert_eq!(register.to_address().unwrap().uri.host, "vendor.example");

    let contact = register.contact().unwrap();
    assert_eq!(contact.param("expires"), Some(Some("300")));
    assert_eq!(contact.param("+sip.instance"), Some(Some("\"<urn:uuid:0d3c1d4e>\"")));
    assert_eq!(contact.uri.param("uniq"), Some(Some("test01")));

    device.reply(&register, 200, from).await;
    registering.await.unwrap().unwrap();

    // CSeq grows across registrations on the same Call-ID
    let again = tokio::spawn({
        let agent = agent.clone();
        async move { agent.register().await }
    });
    let (renewal, from) = device.recv_request().await;
    assert_eq!(renewal.call_id(), register.call_id());
    assert_eq!(renewal.seq(), register.seq() + 1);
    device.reply(&renewal, 200, from).await;
    assert_ok!(again.await.unwrap());
}

#[tokio::test]
async fn test_message_failure_carries_status() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.message("open_door").await }
    });

    let (message, from) = device.recv_request().await;
    assert_eq!(message.method, Method::Message);
    assert_eq!(message.content_type(), Some("text/plain"));
    assert_eq!(message.body_str(), Some("open_door"));
    // Contact is only sent on INVITE, REGISTER and ACK
    assert!(message.contact().is_none());

    device.reply(&message, 404, from).await;
    let err = sending.await.unwrap().unwrap_err();
    assert!(matches!(err, DialogError::Transaction { status: 404, .. }));
}

#[tokio::test]
async fn test_bye_408_is_not_an_error() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let bye = tokio::spawn({
        let agent = agent.clone();
        async move { agent.request(Method::Bye, Vec::new(), None, None).await }
    });
    let (request, from) = device.recv_request().await;
    device.reply(&request, 408, from).await;
    assert_eq!(bye.await.unwrap().unwrap().status, 408);
}

#[tokio::test]
async fn test_send_bye_is_bounded_and_ends_call() {
    let device = FakeDevice::bind().await;
    let agent = device
        .agent(device.options().with_bye_timeout(Duration::from_millis(200)))
        .await;

    let started = Instant::now();
    agent.send_bye().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(agent.is_call_ended());

    let (bye, _) = device.recv_request().await;
    assert_eq!(bye.method, Method::Bye);
}

#[tokio::test]
async fn test_destroy_fails_pending_and_future_requests() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let pending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.message("ping").await }
    });
    let _ = device.recv_request().await;

    agent.destroy().await;
    assert!(matches!(pending.await.unwrap(), Err(DialogError::Destroyed)));
    assert!(matches!(agent.message("late").await, Err(DialogError::Destroyed)));
    assert!(matches!(agent.register().await, Err(DialogError::Destroyed)));

    // Idempotent
    agent.destroy().await;
}

#[tokio::test]
async fn test_cancel_unanswered_invite() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;

    let call = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .invite(&rtp_options(), &default_audio_section, &default_video_section, None)
                .await
        }
    });
    let (invite, from) = device.recv_request().await;
    device.reply(&invite, 180, from).await;

    // Let the 180 reach the agent before cancelling
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.dialog_state(), DialogState::Ringing);

    let cancelling = tokio::spawn({
        let agent = agent.clone();
        async move { agent.cancel().await }
    });
    let (cancel, from) = device.recv_request().await;
    assert_eq!(cancel.method, Method::Cancel);
    assert_eq!(cancel.seq(), invite.seq());
    assert_eq!(cancel.branch(), invite.branch());
    assert_eq!(cancel.uri, invite.uri);

    device.reply(&cancel, 200, from).await;
    device.reply(&invite, 487, from).await;

    assert_eq!(cancelling.await.unwrap().unwrap().status, 200);
    let (ack, _) = device.recv_request().await;
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(call.await.unwrap().unwrap_err().status(), Some(487));
}

#[tokio::test]
async fn test_cancel_without_invite_is_rejected() {
    let device = FakeDevice::bind().await;
    let agent = device.agent(device.options()).await;
    assert!(matches!(agent.cancel().await, Err(DialogError::InvalidState { .. })));
}

#[tokio::test]
async fn test_tcp_device_closing_mid_invite_ends_the_call() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = SipOptions::new(
        "sip:ghome@127.0.0.1",
        format!("sip:door@{}", listener.local_addr().unwrap()),
        "127.0.0.1".parse().unwrap(),
    )
    .with_transport(TransportType::Tcp);

    let (agent, accepted) = tokio::join!(UserAgent::new(options, ContactId::new("test01")), listener.accept());
    let agent = agent.unwrap();
    let (mut stream, _) = accepted.unwrap();
    let mut ended = agent.call_ended();

    let call = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .invite(&rtp_options(), &default_audio_section, &default_video_section, None)
                .await
        }
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
        .expect("INVITE still pending after the device closed the connection")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DialogError::Transport(_)));

    tokio::time::timeout(Duration::from_secs(1), ended.wait_for(|ended| *ended))
        .await
        .expect("call-ended flag not raised")
        .unwrap();
    assert!(agent.is_destroyed());
    assert!(agent.is_transport_lost());
    assert_eq!(agent.dialog_state(), DialogState::Ended);
}
