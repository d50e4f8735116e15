//! Single outbound TCP connection carrying `Content-Length` framed SIP

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use intercom_sip_core::{frame_length, SipMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportType, DEFAULT_CHANNEL_CAPACITY};

/// Messages larger than this close the connection instead of buffering forever
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// TCP transport towards one remote endpoint
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct TcpTransportInner {
    writer: Mutex<OwnedWriteHalf>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    closed: AtomicBool,
    shutdown: Notify,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TcpTransport {
    /// Connect to `remote` and start reading frames from it
    pub async fn connect(
        remote: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let stream = TcpStream::connect(remote).await?;
        Self::from_stream(stream, channel_capacity)
    }

    /// Wrap an already established stream
    pub fn from_stream(
        stream: TcpStream,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        info!("SIP TCP transport {} connected to {}", local_addr, peer_addr);

        let transport = TcpTransport {
            inner: Arc::new(TcpTransportInner {
                writer: Mutex::new(writer),
                local_addr,
                peer_addr,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                events_tx,
            }),
        };
        transport.spawn_receive_loop(reader);

        Ok((transport, events_rx))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    fn spawn_receive_loop(&self, mut reader: OwnedReadHalf) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut buffer = BytesMut::with_capacity(8 * 1024);

            'read: while !inner.closed.load(Ordering::Acquire) {
                let read = tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    read = reader.read_buf(&mut buffer) => read,
                };

                match read {
                    Ok(0) => {
                        debug!("TCP peer {} closed the connection", inner.peer_addr);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error reading from TCP peer {}: {}", inner.peer_addr, e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error reading stream: {}", e),
                            })
                            .await;
                        break;
                    }
                }

                while let Some(len) = frame_length(&buffer) {
                    let frame = buffer.split_to(len);
                    let event = match intercom_sip_core::parse_message(&frame) {
                        Ok(message) => TransportEvent::MessageReceived {
                            message,
                            source: inner.peer_addr,
                            destination: inner.local_addr,
                        },
                        Err(e) => {
                            warn!("Error parsing SIP frame from {}: {}", inner.peer_addr, e);
                            TransportEvent::Error {
                                error: format!("Error parsing SIP message: {}", e),
                            }
                        }
                    };
                    if inner.events_tx.send(event).await.is_err() {
                        break 'read;
                    }
                }

                // Bare CRLF keepalives never form a frame
                let keepalive = buffer.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
                if keepalive == buffer.len() {
                    buffer.advance(keepalive);
                }

                if buffer.len() > MAX_FRAME_SIZE {
                    warn!("Discarding oversized TCP frame from {}", inner.peer_addr);
                    break;
                }
            }

            inner.closed.store(true, Ordering::Release);
            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("TCP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    async fn send_message(&self, message: SipMessage, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if destination != self.inner.peer_addr {
            warn!(
                "TCP transport is connected to {}, ignoring requested destination {}",
                self.inner.peer_addr, destination
            );
        }

        let bytes = message.to_bytes();
        debug!("Sending {} byte message to {}", bytes.len(), self.inner.peer_addr);
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.shutdown.notify_one();
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("TCP shutdown towards {} failed: {}", self.inner.peer_addr, e);
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpTransport({} -> {})", self.inner.local_addr, self.inner.peer_addr)
    }
}
