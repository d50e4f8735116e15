//! SIP message parser
//!
//! Start lines and header lines are parsed with nom over the raw bytes.
//! Folded header lines (continuations starting with SP/HTAB) are joined
//! before header values are stored.

use std::str;

use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till1, take_while, take_while1, take_while_m_n},
    character::complete::{space0, space1},
    combinator::{map_res, opt},
    sequence::{terminated, tuple},
    IResult,
};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::headers::Headers;
use crate::types::method::Method;
use crate::types::sip_request::SipRequest;
use crate::types::sip_response::SipResponse;
use crate::types::uri::SipUri;
use crate::types::SipMessage;

type ParseResult<'a, O> = IResult<&'a [u8], O>;

enum StartLine {
    Request(Method, SipUri),
    Response(u16, String),
}

fn utf8(input: &[u8]) -> std::result::Result<&str, str::Utf8Error> {
    str::from_utf8(input)
}

fn sip_version(input: &[u8]) -> ParseResult<&[u8]> {
    tag_no_case(b"SIP/2.0")(input)
}

// Request-Line = Method SP Request-URI SP SIP-Version
fn request_line(input: &[u8]) -> ParseResult<StartLine> {
    let (input, (method, _, uri, _, _)) = tuple((
        map_res(map_res(take_while1(|c: u8| c.is_ascii_alphabetic()), utf8), str::parse::<Method>),
        space1,
        map_res(map_res(take_till1(|c: u8| c == b' '), utf8), str::parse::<SipUri>),
        space1,
        sip_version,
    ))(input)?;
    Ok((input, StartLine::Request(method, uri)))
}

// Status-Line = SIP-Version SP Status-Code SP Reason-Phrase
fn status_line(input: &[u8]) -> ParseResult<StartLine> {
    let (input, (_, _, code, _, reason)) = tuple((
        sip_version,
        space1,
        map_res(
            map_res(take_while_m_n(3, 3, |c: u8| c.is_ascii_digit()), utf8),
            str::parse::<u16>,
        ),
        space0,
        map_res(take_while(|_| true), utf8),
    ))(input)?;
    Ok((input, StartLine::Response(code, reason.trim().to_string())))
}

fn start_line(input: &[u8]) -> ParseResult<StartLine> {
    alt((status_line, request_line))(input)
}

// message-header = field-name HCOLON field-value
fn header_line(input: &[u8]) -> ParseResult<(&str, &str)> {
    let (input, name) = terminated(
        map_res(take_till1(|c: u8| c == b':' || c == b' ' || c == b'\t'), utf8),
        tuple((space0, tag(b":"), opt(space0))),
    )(input)?;
    let (input, value) = map_res(take_while(|_| true), utf8)(input)?;
    Ok((input, (name, value.trim())))
}

/// Offset of the blank line ending the header block and the length of the
/// separator found there
fn header_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

fn logical_lines(head: &[u8]) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    for raw in head.split(|b| *b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let folded = matches!(raw.first(), Some(b' ') | Some(b'\t'));
        match lines.last_mut() {
            Some(last) if folded => {
                let indent = raw.iter().take_while(|b| **b == b' ' || **b == b'\t').count();
                last.push(b' ');
                last.extend_from_slice(&raw[indent..]);
            }
            _ => lines.push(raw.to_vec()),
        }
    }
    lines
}

fn content_length(headers: &Headers) -> Result<Option<usize>> {
    headers
        .get("Content-Length")
        .map(|value| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::invalid_header("Content-Length", value))
        })
        .transpose()
}

/// Parse one complete SIP message
pub fn parse_message(data: &[u8]) -> Result<SipMessage> {
    // Leading CRLFs are keepalives and are skipped (RFC 5626 §3.5.1)
    let start = data.iter().position(|b| *b != b'\r' && *b != b'\n').unwrap_or(data.len());
    let data = &data[start..];

    let (head, body) = match header_end(data) {
        Some((pos, sep)) => (&data[..pos], &data[pos + sep..]),
        None => (data, &data[data.len()..]),
    };

    let mut lines = logical_lines(head).into_iter();
    let first = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| Error::parse("empty message"))?;

    let (_, start_line) = start_line(&first).map_err(|e| {
        Error::parse(format!(
            "invalid start line '{}': {:?}",
            String::from_utf8_lossy(&first),
            e.map(|e| e.code)
        ))
    })?;

    let mut headers = Headers::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (_, (name, value)) = header_line(&line).map_err(|_| {
            Error::parse(format!("invalid header line '{}'", String::from_utf8_lossy(&line)))
        })?;
        headers.append(name, value);
    }

    let body = match content_length(&headers)? {
        Some(len) if len > body.len() => {
            return Err(Error::parse(format!(
                "Content-Length {} exceeds the {} body bytes received",
                len,
                body.len()
            )));
        }
        Some(len) => Bytes::copy_from_slice(&body[..len]),
        None => Bytes::copy_from_slice(body),
    };

    let message = match start_line {
        StartLine::Request(method, uri) => SipMessage::Request(SipRequest {
            method,
            uri,
            headers,
            body,
        }),
        StartLine::Response(status, reason) => SipMessage::Response(SipResponse {
            status,
            reason,
            headers,
            body,
        }),
    };
    trace!("Parsed SIP message with {} body bytes", message_body_len(&message));
    Ok(message)
}

fn message_body_len(message: &SipMessage) -> usize {
    match message {
        SipMessage::Request(request) => request.body.len(),
        SipMessage::Response(response) => response.body.len(),
    }
}

/// Length of the first complete message in a stream buffer.
///
/// Returns `None` until the header block and the `Content-Length` bytes
/// of body have arrived. A missing Content-Length means an empty body.
/// Leading keepalive CRLFs are counted as part of the frame.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    let skip = buf.iter().position(|b| *b != b'\r' && *b != b'\n')?;
    let data = &buf[skip..];
    let (pos, sep) = header_end(data)?;

    let mut headers = Headers::new();
    for line in logical_lines(&data[..pos]).iter().skip(1) {
        if let Ok((_, (name, value))) = header_line(line) {
            headers.append(name, value);
        }
    }
    let body_len = content_length(&headers).ok()?.unwrap_or(0);

    let total = skip + pos + sep + body_len;
    (buf.len() >= total).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::headers::{HeaderAccess, HeaderName};

    const INVITE: &str = "INVITE sip:ghome@10.0.0.2:5060 SIP/2.0\r\n\
        v: SIP/2.0/UDP 10.0.0.7:5060;branch=z9hG4bK77\r\n\
        f: <sip:door@10.0.0.7>;tag=door1\r\n\
        t: <sip:ghome@10.0.0.2>\r\n\
        i: abc123\r\n\
        CSeq: 20 INVITE\r\n\
        Subject: front\r\n door\r\n\
        c: application/sdp\r\n\
        l: 10\r\n\
        \r\n\
        v=0\r\no=-\r\n";

    #[test]
    fn test_parse_request_with_compact_and_folded_headers() {
        let SipMessage::Request(request) = parse_message(INVITE.as_bytes()).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, Method::Invite);
        assert_eq!(request.uri.port, Some(5060));
        assert_eq!(request.call_id(), Some("abc123"));
        assert_eq!(request.seq(), 20);
        assert_eq!(request.from_tag().as_deref(), Some("door1"));
        assert_eq!(request.headers.get("Subject"), Some("front door"));
        assert_eq!(request.content_type(), Some("application/sdp"));
        assert_eq!(&request.body[..], b"v=0\r\no=-\r\n");
    }

    #[test]
    fn test_parse_response() {
        let data = b"SIP/2.0 408 Request Timeout\r\nCall-ID: x\r\nCSeq: 3 BYE\r\n\r\n";
        let SipMessage::Response(response) = parse_message(data).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.status, 408);
        assert_eq!(response.reason, "Request Timeout");
        assert_eq!(response.headers.get(HeaderName::CSeq), Some("3 BYE"));
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_rejects_garbage_and_short_bodies() {
        assert!(parse_message(b"").is_err());
        assert!(parse_message(b"\r\n\r\n").is_err());
        assert!(parse_message(b"HELLO WORLD\r\n\r\n").is_err());
        assert!(parse_message(b"SIP/2.0 200 OK\r\nContent-Length: 50\r\n\r\nshort").is_err());
    }

    #[test]
    fn test_round_trip_through_serialiser() {
        let SipMessage::Request(request) = parse_message(INVITE.as_bytes()).unwrap() else {
            panic!("expected request");
        };
        let SipMessage::Request(reparsed) = parse_message(&request.to_bytes()).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(reparsed.uri, request.uri);
        assert_eq!(reparsed.headers.get(HeaderName::Via), request.headers.get(HeaderName::Via));
        assert_eq!(reparsed.headers.get(HeaderName::ContentLength), Some("10"));
        assert_eq!(reparsed.body, request.body);
    }

    #[test]
    fn test_frame_length() {
        let message = b"SIP/2.0 200 OK\r\nContent-Length: 4\r\n\r\nbody";
        let mut stream = b"\r\n\r\n".to_vec();
        stream.extend_from_slice(message);
        stream.extend_from_slice(b"SIP/2.0 100 Trying\r\n");

        assert_eq!(frame_length(&stream), Some(4 + message.len()));
        assert_eq!(frame_length(&message[..message.len() - 1]), None);
        assert_eq!(frame_length(b"\r\n\r\n"), None);
    }
}
