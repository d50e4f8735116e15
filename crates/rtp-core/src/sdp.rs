//! Extraction of RTP endpoint information from SDP offers and answers
//!
//! This is deliberately not a full SDP parser. The relay only needs the
//! connection address and, per media type, the RTP/RTCP ports, SSRC, ICE
//! credentials and SRTP key material. Everything else stays in the raw text
//! carried by [`RtpDescription::sdp`] so vendor attributes such as
//! `a=DEVADDR` survive untouched.

use std::fmt;
use std::net::IpAddr;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::srtp::{decode_srtp, SrtpKeyMaterial};

/// Media types carried by intercom calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote endpoint for one media type.
///
/// The default value (port 0) means the remote did not offer this media.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpStreamDescription {
    pub port: u16,
    pub rtcp_port: u16,
    pub ssrc: Option<u32>,
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub srtp: Option<SrtpKeyMaterial>,
}

impl RtpStreamDescription {
    /// Whether the remote offered this media at all
    pub fn is_present(&self) -> bool {
        self.port != 0
    }

    /// RTCP shares the RTP port
    pub fn is_rtcp_muxed(&self) -> bool {
        self.port != 0 && self.port == self.rtcp_port
    }

    /// ICE credentials when both halves were advertised
    pub fn ice_credentials(&self) -> Option<(&str, &str)> {
        match (&self.ice_ufrag, &self.ice_pwd) {
            (Some(ufrag), Some(pwd)) => Some((ufrag.as_str(), pwd.as_str())),
            _ => None,
        }
    }
}

/// Remote media description of a call, produced once from the offer/answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpDescription {
    pub address: IpAddr,
    pub audio: RtpStreamDescription,
    pub video: RtpStreamDescription,
    pub sdp: String,
}

impl RtpDescription {
    pub fn stream(&self, media: MediaType) -> &RtpStreamDescription {
        match media {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }

    /// Whether either media type negotiated ICE
    pub fn uses_ice(&self) -> bool {
        self.audio.ice_credentials().is_some() || self.video.ice_credentials().is_some()
    }
}

/// Local ports (and optional SRTP key) for one media type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalStreamOptions {
    pub port: u16,
    pub rtcp_port: u16,
    pub srtp: Option<SrtpKeyMaterial>,
}

/// Local RTP endpoints bound by a call session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpOptions {
    pub audio: LocalStreamOptions,
    pub video: LocalStreamOptions,
}

impl RtpOptions {
    pub fn stream(&self, media: MediaType) -> &LocalStreamOptions {
        match media {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
        }
    }
}

/// Split SDP text into the session section followed by one section per `m=` line
pub fn split_sections(sdp: &str) -> Vec<String> {
    let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with("m=") {
            sections.push(Vec::new());
        }
        if let Some(current) = sections.last_mut() {
            current.push(line);
        }
    }
    sections.into_iter().map(|lines| lines.join("\r\n")).collect()
}

fn attribute<'a>(section: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("a={}:", name);
    section
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
}

fn has_flag(section: &str, name: &str) -> bool {
    let flag = format!("a={}", name);
    section.lines().any(|line| line.trim() == flag)
}

/// Parse the remote description of a call.
///
/// Fails when the session-level `c=` line is absent; the offending SDP is
/// logged before the error is returned.
pub fn parse_rtp_description(sdp: &str) -> Result<RtpDescription> {
    match parse_sections(sdp) {
        Ok(description) => Ok(description),
        Err(e) => {
            warn!("Failed to parse remote SDP: {}\n{}", e, sdp);
            Err(e)
        }
    }
}

fn parse_sections(sdp: &str) -> Result<RtpDescription> {
    let sections = split_sections(sdp);
    let session = sections.first().map(String::as_str).unwrap_or_default();

    let connection = session
        .lines()
        .find_map(|line| line.strip_prefix("c="))
        .ok_or_else(|| Error::MissingConnection { sdp: sdp.to_string() })?;

    // c=IN IP4 <addr>[/ttl]
    let address = connection
        .split_whitespace()
        .nth(2)
        .and_then(|addr| addr.split('/').next())
        .ok_or_else(|| Error::sdp(format!("malformed connection line: c={}", connection), sdp))?;
    let address: IpAddr = address
        .parse()
        .map_err(|_| Error::sdp(format!("invalid connection address: {}", address), sdp))?;

    let audio = get_rtp_description(&sections, MediaType::Audio)?;
    let video = get_rtp_description(&sections, MediaType::Video)?;

    debug!(
        "Remote media at {}: audio {}/{} video {}/{}",
        address, audio.port, audio.rtcp_port, video.port, video.rtcp_port
    );

    Ok(RtpDescription {
        address,
        audio,
        video,
        sdp: sdp.to_string(),
    })
}

/// Describe one media type from pre-split SDP sections.
///
/// A missing `m=<media>` section yields the zero description. ICE
/// credentials fall back to the session section when the media section
/// does not carry its own.
pub fn get_rtp_description(sections: &[String], media: MediaType) -> Result<RtpStreamDescription> {
    let prefix = format!("m={} ", media.as_str());
    let section = match sections.iter().find(|s| s.starts_with(&prefix)) {
        Some(section) => section.as_str(),
        None => return Ok(RtpStreamDescription::default()),
    };
    let session = sections
        .first()
        .filter(|s| !s.starts_with("m="))
        .map(String::as_str)
        .unwrap_or_default();

    let media_line = section.lines().next().unwrap_or_default();
    let port_token = media_line.split_whitespace().nth(1).unwrap_or_default();
    let port: u16 = port_token
        .split('/')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::sdp(format!("invalid port in media line: {}", media_line), section))?;

    let rtcp_port = if has_flag(section, "rtcp-mux") {
        port
    } else if let Some(rtcp) = attribute(section, "rtcp") {
        rtcp.split_whitespace()
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| Error::sdp(format!("invalid rtcp attribute: {}", rtcp), section))?
    } else {
        port.wrapping_add(1)
    };

    let ssrc = attribute(section, "ssrc")
        .and_then(|value| value.split_whitespace().next())
        .and_then(|value| value.parse().ok());

    let ice_ufrag = attribute(section, "ice-ufrag")
        .or_else(|| attribute(session, "ice-ufrag"))
        .map(str::to_string);
    let ice_pwd = attribute(section, "ice-pwd")
        .or_else(|| attribute(session, "ice-pwd"))
        .map(str::to_string);

    let srtp = match attribute(section, "crypto") {
        Some(crypto) => {
            let inline = crypto
                .split_whitespace()
                .find_map(|token| token.strip_prefix("inline:"))
                .ok_or_else(|| Error::InvalidCrypto(crypto.to_string()))?;
            Some(decode_srtp(inline)?)
        }
        None => None,
    };

    Ok(RtpStreamDescription {
        port,
        rtcp_port,
        ssrc,
        ice_ufrag,
        ice_pwd,
        srtp,
    })
}
