//! Packet classification for sockets that carry STUN, RTP and RTCP together
//!
//! Intercom devices frequently multiplex connectivity checks, media and
//! control traffic on a single port, so every datagram read from a media
//! socket goes through these checks before it is routed.

use crate::constants::STUN_MAGIC_COOKIE;

/// Returns true when the buffer looks like a STUN message (RFC 5389 §6).
///
/// The buffer must be longer than 8 bytes and carry the magic cookie at
/// offset 4.
pub fn is_stun_message(buf: &[u8]) -> bool {
    buf.len() > 8 && buf[4..8] == STUN_MAGIC_COOKIE.to_be_bytes()
}

/// Payload type of an RTP packet (second byte, marker bit masked off)
pub fn get_payload_type(buf: &[u8]) -> u8 {
    buf.get(1).map(|b| b & 0x7f).unwrap_or(0)
}

/// Whether a payload type belongs to the media ranges used by intercom codecs.
///
/// PCMU (0) and the dynamic range above 90 are media. Everything in 1..=90
/// is treated as RTCP or other control traffic sharing the socket; RTCP
/// packet types 200-204 land in 72-76 once the top bit is masked.
pub fn is_rtp_message_payload_type(payload_type: u8) -> bool {
    payload_type > 90 || payload_type == 0
}

/// Big-endian sequence number at offset 2 of an RTP header
pub fn get_sequence_number(buf: &[u8]) -> u16 {
    match buf.get(2..4) {
        Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]),
        None => 0,
    }
}

/// Sequence continuity tracker applied by every media relay consumer.
///
/// Each packet is compared against `(previous + 1) % 0xFFFF`. The modulus is
/// one short of the 16-bit space, so a wrap through 65535 is counted as loss.
/// Downstream dashboards were calibrated against that count, so it is kept.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last: Option<u16>,
    received: u64,
    lost: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received sequence number; returns false when it was not the expected one
    pub fn record(&mut self, sequence: u16) -> bool {
        self.received += 1;
        let in_order = match self.last {
            Some(previous) => {
                let expected = ((previous as u32 + 1) % 0x0FFFF) as u16;
                expected == sequence
            }
            None => true,
        };
        if !in_order {
            self.lost += 1;
        }
        self.last = Some(sequence);
        in_order
    }

    /// Record the sequence number of a raw RTP packet
    pub fn record_packet(&mut self, packet: &[u8]) -> bool {
        self.record(get_sequence_number(packet))
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.last
    }
}
