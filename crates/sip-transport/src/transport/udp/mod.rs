use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use intercom_sip_core::SipMessage;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportType, DEFAULT_CHANNEL_CAPACITY};

/// Largest datagram the receive loop accepts
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            while !inner.closed.load(Ordering::Acquire) {
                let received = tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    received = inner.socket.recv_from(&mut buf) => received,
                };

                match received {
                    Ok((len, source)) => {
                        let packet = &buf[..len];
                        if packet.iter().all(|b| *b == b'\r' || *b == b'\n') {
                            trace!("Keepalive from {}", source);
                            continue;
                        }
                        debug!("Received {} byte SIP datagram from {}", len, source);

                        let event = match intercom_sip_core::parse_message(packet) {
                            Ok(message) => TransportEvent::MessageReceived {
                                message,
                                source,
                                destination: inner.local_addr,
                            },
                            Err(e) => {
                                warn!("Error parsing SIP message from {}: {}", source, e);
                                TransportEvent::Error {
                                    error: format!("Error parsing SIP message: {}", e),
                                }
                            }
                        };

                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Acquire) {
                            break;
                        }
                        error!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error receiving packet: {}", e),
                            })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }

    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        debug!("Sending {} byte message to {}", bytes.len(), destination);
        self.inner.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.shutdown.notify_one();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
