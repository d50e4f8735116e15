//! Session event system
//!
//! Events fan out over a `tokio::sync::broadcast` channel, so the RTSP
//! bridge, intercom audio and diagnostics can each hold a subscriber.
//! Subscribers that fall behind skip ahead rather than stall the receive
//! loops.

use std::net::SocketAddr;

use bytes::Bytes;
use intercom_rtp_core::MediaType;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SessionError};
use crate::media::SocketKind;

/// Events published by a call session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First media datagram (at least 4 bytes, not STUN) seen on this
    /// media's RTP socket; sent once per media. STUN keepalive responses
    /// never latch a stream.
    StreamLatched { media: MediaType, from: SocketAddr },

    /// Media packet received on an RTP socket
    RtpPacket { media: MediaType, packet: Bytes },

    /// Control packet, either from the RTCP socket or multiplexed on RTP
    RtcpPacket { media: MediaType, packet: Bytes },

    /// An ICE connectivity check was answered
    ConnectivityEstablished {
        media: MediaType,
        kind: SocketKind,
        mapped: Option<SocketAddr>,
    },

    /// The call is over; always the last event
    CallEnded { reason: String },
}

/// Subscriber wrapper for session events
pub struct SessionEventSubscriber {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionEventSubscriber {
    pub fn new(receiver: broadcast::Receiver<SessionEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    ///
    /// Fails once the session has ended and every buffered event was read.
    pub async fn receive(&mut self) -> Result<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Session event subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SessionError::events("event channel closed"));
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_receive(&mut self) -> Result<Option<SessionEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Session event subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SessionError::events("event channel closed"));
                }
            }
        }
    }
}

/// Publishes the events of one session
pub struct SessionEventProcessor {
    sender: RwLock<Option<broadcast::Sender<SessionEvent>>>,
}

impl std::fmt::Debug for SessionEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventProcessor")
            .field("running", &self.is_running())
            .finish()
    }
}

impl SessionEventProcessor {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Publish an event; events published after `close` are dropped
    pub fn publish(&self, event: SessionEvent) {
        match &event {
            SessionEvent::StreamLatched { media, from } => info!("{} stream latched from {}", media, from),
            SessionEvent::ConnectivityEstablished { media, kind, mapped } => {
                info!("{} {} connectivity established, mapped {:?}", media, kind, mapped)
            }
            SessionEvent::CallEnded { reason } => debug!("Publishing call end: {}", reason),
            _ => {}
        }

        let sender = self.sender.read();
        match sender.as_ref() {
            // No subscribers is fine
            Some(sender) => {
                let _ = sender.send(event);
            }
            None => trace!("Event processor closed, dropping event"),
        }
    }

    pub fn subscribe(&self) -> Result<SessionEventSubscriber> {
        match self.sender.read().as_ref() {
            Some(sender) => Ok(SessionEventSubscriber::new(sender.subscribe())),
            None => Err(SessionError::Ended),
        }
    }

    /// Drop the sender; subscribers drain what is buffered and then see the close
    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_drain_then_see_close() {
        let processor = SessionEventProcessor::new(16);
        let mut subscriber = processor.subscribe().unwrap();

        processor.publish(SessionEvent::CallEnded {
            reason: "test".to_string(),
        });
        processor.close();
        processor.publish(SessionEvent::CallEnded {
            reason: "late".to_string(),
        });

        match subscriber.receive().await.unwrap() {
            SessionEvent::CallEnded { reason } => assert_eq!(reason, "test"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(subscriber.receive().await.is_err());
        assert!(matches!(processor.subscribe(), Err(SessionError::Ended)));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let processor = SessionEventProcessor::new(2);
        let mut subscriber = processor.subscribe().unwrap();

        for i in 0..5u8 {
            processor.publish(SessionEvent::RtpPacket {
                media: MediaType::Audio,
                packet: Bytes::from(vec![i]),
            });
        }

        match subscriber.try_receive().unwrap() {
            Some(SessionEvent::RtpPacket { packet, .. }) => assert_eq!(packet[0], 3),
            other => panic!("unexpected {:?}", other),
        }
    }
}
