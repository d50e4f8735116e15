pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use intercom_sip_core::SipMessage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default capacity of the event channel handed out by `bind`/`connect`
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// SIP transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Udp,
    Tcp,
}

impl TransportType {
    /// Value used in Via headers and `transport=` URI parameters
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Udp => "UDP",
            TransportType::Tcp => "TCP",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportType::Udp),
            "tcp" => Ok(TransportType::Tcp),
            other => Err(format!("unsupported SIP transport '{}'", other)),
        }
    }
}

/// Events emitted by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message arrived
    MessageReceived {
        message: SipMessage,
        source: SocketAddr,
        destination: SocketAddr,
    },

    /// Receive or parse failure; the loop keeps running
    Error { error: String },

    /// The receive loop exited
    Closed,
}

/// A connection-oriented or connectionless SIP transport
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn local_addr(&self) -> Result<SocketAddr>;

    fn transport_type(&self) -> TransportType;

    /// Serialise and send `message` to `destination`
    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()>;

    /// Stop the receive loop; further sends fail with `TransportClosed`
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
