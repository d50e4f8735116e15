//! Local session descriptions
//!
//! The user agent writes the session-level lines (`v=`, `o=`, `s=`, `c=`,
//! `t=`). Each media section comes from a caller-supplied
//! [`SectionBuilder`], so codec, SSRC and crypto choices stay with the
//! caller. A builder returning no lines leaves that media out of the offer.

use std::net::IpAddr;

use intercom_rtp_core::{LocalStreamOptions, MediaType, RtpOptions};

/// Produces the lines of one media section, starting with its `m=` line
pub trait SectionBuilder: Send + Sync {
    fn build(&self, stream: &LocalStreamOptions) -> Vec<String>;
}

impl<F> SectionBuilder for F
where
    F: Fn(&LocalStreamOptions) -> Vec<String> + Send + Sync,
{
    fn build(&self, stream: &LocalStreamOptions) -> Vec<String> {
        self(stream)
    }
}

fn address_line(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("IN IP4 {}", v4),
        IpAddr::V6(v6) => format!("IN IP6 {}", v6),
    }
}

fn transport_profile(stream: &LocalStreamOptions) -> &'static str {
    if stream.srtp.is_some() {
        "RTP/SAVP"
    } else {
        "RTP/AVP"
    }
}

fn common_attributes(stream: &LocalStreamOptions, lines: &mut Vec<String>) {
    if stream.rtcp_port == stream.port {
        lines.push("a=rtcp-mux".to_string());
    } else if stream.rtcp_port != 0 {
        lines.push(format!("a=rtcp:{}", stream.rtcp_port));
    }
    if let Some(srtp) = &stream.srtp {
        lines.push(srtp.to_crypto_attribute());
    }
}

/// PCMU audio, send and receive
pub fn default_audio_section(stream: &LocalStreamOptions) -> Vec<String> {
    let mut lines = vec![
        format!("m=audio {} {} 0 101", stream.port, transport_profile(stream)),
        "a=rtpmap:0 PCMU/8000".to_string(),
        "a=rtpmap:101 telephone-event/8000".to_string(),
        "a=fmtp:101 0-15".to_string(),
    ];
    common_attributes(stream, &mut lines);
    lines.push("a=sendrecv".to_string());
    lines
}

/// H.264 video, receive only
pub fn default_video_section(stream: &LocalStreamOptions) -> Vec<String> {
    let mut lines = vec![
        format!("m=video {} {} 96", stream.port, transport_profile(stream)),
        "a=rtpmap:96 H264/90000".to_string(),
        "a=fmtp:96 profile-level-id=42801F;packetization-mode=1".to_string(),
    ];
    common_attributes(stream, &mut lines);
    lines.push("a=recvonly".to_string());
    lines
}

/// Full SDP body for a local offer or answer
pub fn build_local_sdp(
    local_ip: IpAddr,
    session_name: &str,
    rtp_options: &RtpOptions,
    audio: &dyn SectionBuilder,
    video: &dyn SectionBuilder,
) -> String {
    let session_id = rand::random::<u32>();
    let address = address_line(local_ip);

    let mut lines = vec![
        "v=0".to_string(),
        format!("o=- {} {} {}", session_id, session_id, address),
        format!("s={}", session_name),
        format!("c={}", address),
        "t=0 0".to_string(),
    ];
    for (media, builder) in [(MediaType::Audio, audio), (MediaType::Video, video)] {
        let stream = rtp_options.stream(media);
        if stream.port == 0 {
            continue;
        }
        lines.extend(builder.build(stream));
    }

    let mut sdp = lines.join("\r\n");
    sdp.push_str("\r\n");
    sdp
}
