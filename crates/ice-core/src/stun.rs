use std::net::{IpAddr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

use crate::constants::{STUN_FINGERPRINT_XOR, STUN_HEADER_SIZE, STUN_MAGIC_COOKIE};
use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// CRC-32 used by FINGERPRINT
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Size of an encoded MESSAGE-INTEGRITY attribute (header + HMAC)
const INTEGRITY_ATTR_SIZE: usize = 24;

/// Size of an encoded FINGERPRINT attribute (header + CRC)
const FINGERPRINT_ATTR_SIZE: usize = 8;

/// STUN message types used by binding exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    /// Binding request
    BindingRequest,
    /// Binding success response
    BindingResponse,
    /// Binding error response
    BindingErrorResponse,
    /// Binding indication (no response expected)
    BindingIndication,
    /// Any other method/class combination, kept raw
    Other(u16),
}

impl StunMessageType {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingIndication => 0x0011,
            Self::BindingResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::Other(value) => value,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => Self::BindingRequest,
            0x0011 => Self::BindingIndication,
            0x0101 => Self::BindingResponse,
            0x0111 => Self::BindingErrorResponse,
            other => Self::Other(other),
        }
    }

    /// Success or error response class
    pub fn is_response(self) -> bool {
        matches!(self, Self::BindingResponse | Self::BindingErrorResponse)
    }
}

/// STUN attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunAttributeType {
    MappedAddress,
    Username,
    MessageIntegrity,
    ErrorCode,
    XorMappedAddress,
    Priority,
    UseCandidate,
    Software,
    Fingerprint,
    IceControlled,
    IceControlling,
    Other(u16),
}

impl From<u16> for StunAttributeType {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Self::MappedAddress,
            0x0006 => Self::Username,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x0020 => Self::XorMappedAddress,
            0x0024 => Self::Priority,
            0x0025 => Self::UseCandidate,
            0x8022 => Self::Software,
            0x8028 => Self::Fingerprint,
            0x8029 => Self::IceControlled,
            0x802A => Self::IceControlling,
            _ => Self::Other(value),
        }
    }
}

impl From<StunAttributeType> for u16 {
    fn from(attr_type: StunAttributeType) -> Self {
        match attr_type {
            StunAttributeType::MappedAddress => 0x0001,
            StunAttributeType::Username => 0x0006,
            StunAttributeType::MessageIntegrity => 0x0008,
            StunAttributeType::ErrorCode => 0x0009,
            StunAttributeType::XorMappedAddress => 0x0020,
            StunAttributeType::Priority => 0x0024,
            StunAttributeType::UseCandidate => 0x0025,
            StunAttributeType::Software => 0x8022,
            StunAttributeType::Fingerprint => 0x8028,
            StunAttributeType::IceControlled => 0x8029,
            StunAttributeType::IceControlling => 0x802A,
            StunAttributeType::Other(value) => value,
        }
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    pub attr_type: StunAttributeType,
    pub value: Bytes,
}

impl StunAttribute {
    pub fn new(attr_type: StunAttributeType, value: Bytes) -> Self {
        Self { attr_type, value }
    }

    /// XOR-MAPPED-ADDRESS carrying the address a request arrived from
    pub fn xor_mapped_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Self {
        let mut value = BytesMut::with_capacity(20);
        value.put_u8(0);
        value.put_u8(match addr.ip() {
            IpAddr::V4(_) => 1,
            IpAddr::V6(_) => 2,
        });
        value.put_u16(addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16);

        match addr.ip() {
            IpAddr::V4(ipv4) => {
                value.put_u32(u32::from_be_bytes(ipv4.octets()) ^ STUN_MAGIC_COOKIE);
            }
            IpAddr::V6(ipv6) => {
                value.put_slice(&xor_v6(ipv6.octets(), transaction_id));
            }
        }

        Self::new(StunAttributeType::XorMappedAddress, value.freeze())
    }

    pub fn username(username: &str) -> Self {
        Self::new(StunAttributeType::Username, Bytes::copy_from_slice(username.as_bytes()))
    }

    pub fn software(software: &str) -> Self {
        Self::new(StunAttributeType::Software, Bytes::copy_from_slice(software.as_bytes()))
    }

    pub fn priority(priority: u32) -> Self {
        Self::new(StunAttributeType::Priority, Bytes::copy_from_slice(&priority.to_be_bytes()))
    }

    pub fn use_candidate() -> Self {
        Self::new(StunAttributeType::UseCandidate, Bytes::new())
    }

    pub fn ice_controlling(tiebreaker: u64) -> Self {
        Self::new(StunAttributeType::IceControlling, Bytes::copy_from_slice(&tiebreaker.to_be_bytes()))
    }

    pub fn ice_controlled(tiebreaker: u64) -> Self {
        Self::new(StunAttributeType::IceControlled, Bytes::copy_from_slice(&tiebreaker.to_be_bytes()))
    }

    /// Decode a XOR-MAPPED-ADDRESS value
    pub fn get_xor_mapped_address(&self, transaction_id: &[u8; 12]) -> Result<SocketAddr> {
        if self.attr_type != StunAttributeType::XorMappedAddress {
            return Err(Error::StunError("Not a XOR-MAPPED-ADDRESS attribute".to_string()));
        }

        let value = &self.value[..];
        if value.len() < 8 {
            return Err(Error::StunError("XOR-MAPPED-ADDRESS too short".to_string()));
        }

        let port = BigEndian::read_u16(&value[2..4]) ^ (STUN_MAGIC_COOKIE >> 16) as u16;
        let ip = match value[1] {
            1 => IpAddr::from((BigEndian::read_u32(&value[4..8]) ^ STUN_MAGIC_COOKIE).to_be_bytes()),
            2 if value.len() >= 20 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&value[4..20]);
                IpAddr::from(xor_v6(octets, transaction_id))
            }
            family => {
                return Err(Error::StunError(format!("Unsupported address family: {}", family)));
            }
        };

        Ok(SocketAddr::new(ip, port))
    }
}

fn xor_v6(octets: [u8; 16], transaction_id: &[u8; 12]) -> [u8; 16] {
    let cookie = STUN_MAGIC_COOKIE.to_be_bytes();
    let mut out = [0u8; 16];
    for i in 0..4 {
        out[i] = octets[i] ^ cookie[i];
    }
    for i in 0..12 {
        out[i + 4] = octets[i + 4] ^ transaction_id[i];
    }
    out
}

fn put_attribute(buf: &mut BytesMut, attr_type: u16, value: &[u8]) {
    buf.put_u16(attr_type);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
    let padding = (4 - (value.len() % 4)) % 4;
    buf.put_bytes(0, padding);
}

fn header(msg_type: StunMessageType, length: usize, transaction_id: &[u8; 12]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(STUN_HEADER_SIZE + length);
    buf.put_u16(msg_type.to_u16());
    buf.put_u16(length as u16);
    buf.put_u32(STUN_MAGIC_COOKIE);
    buf.put_slice(transaction_id);
    buf
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    pub msg_type: StunMessageType,
    pub transaction_id: [u8; 12],
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a message with a random transaction id
    pub fn new(msg_type: StunMessageType) -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill(&mut transaction_id);

        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn binding_request() -> Self {
        Self::new(StunMessageType::BindingRequest)
    }

    /// Success response sharing the request's transaction id
    pub fn binding_response_to(request: &StunMessage) -> Self {
        Self {
            msg_type: StunMessageType::BindingResponse,
            transaction_id: request.transaction_id,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attr: StunAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_attribute(mut self, attr: StunAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Encode without MESSAGE-INTEGRITY or FINGERPRINT
    pub fn encode(&self) -> Bytes {
        self.encode_with(None, false)
    }

    /// Encode, optionally appending MESSAGE-INTEGRITY (HMAC-SHA1 over the
    /// message with `integrity_key`) and FINGERPRINT as the final attributes.
    pub fn encode_with(&self, integrity_key: Option<&[u8]>, fingerprint: bool) -> Bytes {
        let mut attrs = BytesMut::new();
        for attr in &self.attributes {
            if matches!(
                attr.attr_type,
                StunAttributeType::MessageIntegrity | StunAttributeType::Fingerprint
            ) {
                continue;
            }
            put_attribute(&mut attrs, attr.attr_type.into(), &attr.value);
        }

        if let Some(key) = integrity_key {
            // Length covers everything up to and including MESSAGE-INTEGRITY
            let mut input = header(self.msg_type, attrs.len() + INTEGRITY_ATTR_SIZE, &self.transaction_id);
            input.put_slice(&attrs);
            let mac = compute_hmac(key, &input);
            put_attribute(&mut attrs, StunAttributeType::MessageIntegrity.into(), &mac);
        }

        if fingerprint {
            let mut input = header(self.msg_type, attrs.len() + FINGERPRINT_ATTR_SIZE, &self.transaction_id);
            input.put_slice(&attrs);
            let crc = CRC32.checksum(&input) ^ STUN_FINGERPRINT_XOR;
            put_attribute(&mut attrs, StunAttributeType::Fingerprint.into(), &crc.to_be_bytes());
        }

        let mut buf = header(self.msg_type, attrs.len(), &self.transaction_id);
        buf.put_slice(&attrs);
        buf.freeze()
    }

    /// Decode message from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STUN_HEADER_SIZE {
            return Err(Error::StunError("Packet too small for STUN header".to_string()));
        }

        // The two most significant bits of every STUN message are zero
        if (bytes[0] & 0xC0) != 0 {
            return Err(Error::StunError("Invalid STUN message".to_string()));
        }

        let msg_type = StunMessageType::from_u16(BigEndian::read_u16(&bytes[0..2]));
        let msg_length = BigEndian::read_u16(&bytes[2..4]) as usize;

        if BigEndian::read_u32(&bytes[4..8]) != STUN_MAGIC_COOKIE {
            return Err(Error::StunError("Invalid STUN magic cookie".to_string()));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..20]);

        let end = STUN_HEADER_SIZE + msg_length;
        if bytes.len() < end {
            return Err(Error::StunError("Packet too small for STUN attributes".to_string()));
        }

        let mut attributes = Vec::new();
        let mut offset = STUN_HEADER_SIZE;
        while offset + 4 <= end {
            let attr_type = BigEndian::read_u16(&bytes[offset..offset + 2]);
            let attr_length = BigEndian::read_u16(&bytes[offset + 2..offset + 4]) as usize;
            offset += 4;

            if offset + attr_length > end {
                return Err(Error::StunError("Incomplete STUN attribute value".to_string()));
            }

            attributes.push(StunAttribute {
                attr_type: attr_type.into(),
                value: Bytes::copy_from_slice(&bytes[offset..offset + attr_length]),
            });
            offset += attr_length + (4 - (attr_length % 4)) % 4;
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
        })
    }

    pub fn get_attribute(&self, attr_type: StunAttributeType) -> Option<&StunAttribute> {
        self.attributes.iter().find(|attr| attr.attr_type == attr_type)
    }

    pub fn username(&self) -> Option<&str> {
        self.get_attribute(StunAttributeType::Username)
            .and_then(|attr| std::str::from_utf8(&attr.value).ok())
    }

    /// Address the remote observed us at
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.get_attribute(StunAttributeType::XorMappedAddress)
            .and_then(|attr| attr.get_xor_mapped_address(&self.transaction_id).ok())
    }

    /// ERROR-CODE as (code, reason)
    pub fn error_code(&self) -> Option<(u16, String)> {
        let attr = self.get_attribute(StunAttributeType::ErrorCode)?;
        if attr.value.len() < 4 {
            return None;
        }
        let code = (attr.value[2] & 0x07) as u16 * 100 + attr.value[3] as u16;
        let reason = String::from_utf8_lossy(&attr.value[4..]).to_string();
        Some((code, reason))
    }

    /// Verify MESSAGE-INTEGRITY of the raw datagram this message was decoded from
    pub fn verify_integrity(raw: &[u8], key: &[u8]) -> Result<()> {
        if raw.len() < STUN_HEADER_SIZE {
            return Err(Error::StunError("Packet too small for STUN header".to_string()));
        }
        let end = (STUN_HEADER_SIZE + BigEndian::read_u16(&raw[2..4]) as usize).min(raw.len());
        let mut offset = STUN_HEADER_SIZE;

        while offset + 4 <= end {
            let attr_type = BigEndian::read_u16(&raw[offset..offset + 2]);
            let attr_length = BigEndian::read_u16(&raw[offset + 2..offset + 4]) as usize;

            if StunAttributeType::from(attr_type) == StunAttributeType::MessageIntegrity {
                if attr_length != 20 || offset + INTEGRITY_ATTR_SIZE > raw.len() {
                    return Err(Error::IntegrityMismatch);
                }
                let mut input = BytesMut::from(&raw[..offset]);
                let adjusted = (offset - STUN_HEADER_SIZE + INTEGRITY_ATTR_SIZE) as u16;
                BigEndian::write_u16(&mut input[2..4], adjusted);

                let mut mac = HmacSha1::new_from_slice(key)
                    .map_err(|_| Error::StunError("Invalid integrity key".to_string()))?;
                mac.update(&input);
                return mac
                    .verify_slice(&raw[offset + 4..offset + INTEGRITY_ATTR_SIZE])
                    .map_err(|_| Error::IntegrityMismatch);
            }

            offset += 4 + attr_length + (4 - (attr_length % 4)) % 4;
        }

        Err(Error::IntegrityMismatch)
    }
}

fn compute_hmac(key: &[u8], input: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    if let Ok(mut mac) = HmacSha1::new_from_slice(key) {
        mac.update(input);
        out.copy_from_slice(&mac.finalize().into_bytes());
    }
    out
}
