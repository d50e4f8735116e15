//! STUN binding exchanges over sockets shared with media.
//!
//! Media sockets have exactly one reader (the owner's receive loop), so the
//! [`BindingClient`] never reads from the socket itself. The owner feeds
//! every STUN response it sees into [`BindingClient::handle_response`] and
//! every binding request into [`StunResponder::respond`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::stun::{StunAttribute, StunMessage, StunMessageType};

/// ICE username fragment and password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    pub fn new(ufrag: impl Into<String>, pwd: impl Into<String>) -> Self {
        Self {
            ufrag: ufrag.into(),
            pwd: pwd.into(),
        }
    }

    /// Random credentials of the lengths RFC 8445 requires (4 and 22 chars minimum)
    pub fn generate() -> Self {
        let random = |len: usize| -> String {
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect()
        };
        Self {
            ufrag: random(8),
            pwd: random(24),
        }
    }
}

/// Retransmission schedule for binding requests (RFC 5389 §7.2.1)
#[derive(Debug, Clone, Copy)]
pub struct RetransmitConfig {
    /// Initial retransmission timeout, doubled after every attempt
    pub initial_rto: Duration,
    /// Total number of transmissions
    pub attempts: u32,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(500),
            attempts: 3,
        }
    }
}

/// Client side of authenticated binding transactions
pub struct BindingClient {
    pending: Mutex<HashMap<[u8; 12], oneshot::Sender<StunMessage>>>,
    retransmit: RetransmitConfig,
}

impl BindingClient {
    pub fn new(retransmit: RetransmitConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            retransmit,
        }
    }

    /// ICE connectivity check towards `destination`.
    ///
    /// USERNAME is `remote_ufrag:local_ufrag` and MESSAGE-INTEGRITY is keyed
    /// with the remote password. Resolves with the address the remote saw us at.
    pub async fn connectivity_check(
        &self,
        socket: &UdpSocket,
        destination: SocketAddr,
        remote: &IceCredentials,
        local_ufrag: &str,
        tiebreaker: u64,
    ) -> Result<Option<SocketAddr>> {
        let request = StunMessage::binding_request()
            .with_attribute(StunAttribute::username(&format!("{}:{}", remote.ufrag, local_ufrag)))
            .with_attribute(StunAttribute::priority(0x6E00_1EFF))
            .with_attribute(StunAttribute::ice_controlling(tiebreaker))
            .with_attribute(StunAttribute::use_candidate());

        let response = self
            .transaction(socket, destination, request, Some(remote.pwd.as_bytes()))
            .await?;
        Ok(response.xor_mapped_address())
    }

    /// Send `request` until a matching response arrives or retransmissions run out
    pub async fn transaction(
        &self,
        socket: &UdpSocket,
        destination: SocketAddr,
        request: StunMessage,
        integrity_key: Option<&[u8]>,
    ) -> Result<StunMessage> {
        let (tx, mut rx) = oneshot::channel();
        let transaction_id = request.transaction_id;
        self.pending.lock().insert(transaction_id, tx);

        let encoded = request.encode_with(integrity_key, integrity_key.is_some());
        let mut rto = self.retransmit.initial_rto;

        let mut outcome = Err(Error::Timeout {
            attempts: self.retransmit.attempts,
        });
        for attempt in 1..=self.retransmit.attempts {
            trace!("STUN binding request to {} (attempt {})", destination, attempt);
            if let Err(e) = socket.send_to(&encoded, destination).await {
                outcome = Err(Error::Io(e));
                break;
            }

            match tokio::time::timeout(rto, &mut rx).await {
                Ok(Ok(response)) => {
                    outcome = match response.msg_type {
                        StunMessageType::BindingErrorResponse => {
                            let (code, reason) = response.error_code().unwrap_or((0, String::new()));
                            Err(Error::BindingFailed { code, reason })
                        }
                        _ => Ok(response),
                    };
                    break;
                }
                Ok(Err(_)) => {
                    outcome = Err(Error::StunError("transaction abandoned".to_string()));
                    break;
                }
                Err(_) => rto *= 2,
            }
        }

        self.pending.lock().remove(&transaction_id);
        outcome
    }

    /// Route a received STUN response to its transaction; false when nobody is waiting
    pub fn handle_response(&self, response: StunMessage) -> bool {
        if !response.msg_type.is_response() {
            return false;
        }
        match self.pending.lock().remove(&response.transaction_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                trace!("Dropping STUN response for unknown transaction");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for BindingClient {
    fn default() -> Self {
        Self::new(RetransmitConfig::default())
    }
}

/// Fire-and-forget binding request used as a NAT keepalive
pub async fn send_binding_request(socket: &UdpSocket, destination: SocketAddr) -> Result<()> {
    let request = StunMessage::binding_request();
    socket.send_to(&request.encode(), destination).await?;
    Ok(())
}

/// Answers binding requests arriving on a media socket
#[derive(Debug, Clone)]
pub struct StunResponder {
    credentials: Option<IceCredentials>,
    software: String,
}

impl StunResponder {
    /// `credentials` are the local ICE credentials; when present responses
    /// carry MESSAGE-INTEGRITY keyed with the local password.
    pub fn new(credentials: Option<IceCredentials>) -> Self {
        Self {
            credentials,
            software: format!("intercom-ice-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Build the response for a binding request seen from `from`
    pub fn response_for(&self, request: &StunMessage, from: SocketAddr) -> Option<Bytes> {
        if request.msg_type != StunMessageType::BindingRequest {
            return None;
        }
        let response = StunMessage::binding_response_to(request)
            .with_attribute(StunAttribute::xor_mapped_address(from, &request.transaction_id))
            .with_attribute(StunAttribute::software(&self.software));

        let key = self.credentials.as_ref().map(|c| c.pwd.as_bytes());
        Some(response.encode_with(key, key.is_some()))
    }

    /// Decode `data` and answer it if it is a binding request.
    ///
    /// Undecodable input is logged at debug level and ignored; returns
    /// whether a response was sent.
    pub async fn respond(&self, socket: &UdpSocket, data: &[u8], from: SocketAddr) -> bool {
        let request = match StunMessage::decode(data) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring undecodable STUN message from {}: {}", from, e);
                return false;
            }
        };

        let Some(response) = self.response_for(&request, from) else {
            return false;
        };

        match socket.send_to(&response, from).await {
            Ok(_) => {
                trace!("Answered STUN binding request from {}", from);
                true
            }
            Err(e) => {
                warn!("Failed to answer STUN binding request from {}: {}", from, e);
                false
            }
        }
    }
}
