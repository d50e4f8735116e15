//! SIP transport layer for the intercom user agent
//!
//! A transport owns one socket, runs a receive loop that parses inbound
//! datagrams or stream frames into [`SipMessage`](intercom_sip_core::SipMessage)s
//! and publishes them as [`TransportEvent`]s on an mpsc channel.

pub mod error;
pub mod transport;


pub use error::{Error, Result};
pub use transport::tcp::TcpTransport;
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent, TransportType};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Open a TCP connection to `remote`
pub async fn connect_tcp(
    remote: std::net::SocketAddr,
) -> Result<(TcpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    TcpTransport::connect(remote, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind_udp, connect_tcp, Error, Result, TcpTransport, Transport, TransportEvent,
        TransportType, UdpTransport,
    };
}
