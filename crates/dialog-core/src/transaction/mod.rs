//! Client transaction table
//!
//! Every outbound request that expects a final response registers a
//! [`TransactionKey`] here before it is sent. The receive loop resolves the
//! matching entry with the first final response; provisional responses
//! never resolve a transaction. Retransmission is left to the remote side.

use std::collections::HashMap;
use std::fmt;

use intercom_sip_core::{HeaderAccess, Method, SipResponse};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Identifies a client transaction by Call-ID, CSeq number and CSeq method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub call_id: String,
    pub seq: u32,
    pub method: Method,
}

impl TransactionKey {
    pub fn new(call_id: impl Into<String>, seq: u32, method: Method) -> Self {
        Self {
            call_id: call_id.into(),
            seq,
            method,
        }
    }

    /// Key a response belongs to, if it carries Call-ID and CSeq
    pub fn for_response(response: &SipResponse) -> Option<Self> {
        let cseq = response.cseq()?;
        Some(Self::new(response.call_id()?, cseq.seq, cseq.method))
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.call_id, self.seq, self.method)
    }
}

/// Outcome of offering a response to the table
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A waiting transaction received the response
    Delivered,
    /// Provisional response for a pending transaction
    Provisional,
    /// Nobody is waiting for this response
    Unmatched,
}

/// Pending client transactions awaiting their final response
#[derive(Default)]
pub struct TransactionTable {
    pending: Mutex<HashMap<TransactionKey, oneshot::Sender<SipResponse>>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction; the receiver resolves with its final response
    pub fn register(&self, key: TransactionKey) -> oneshot::Receiver<SipResponse> {
        let (tx, rx) = oneshot::channel();
        trace!("Registering transaction {}", key);
        if self.pending.lock().insert(key.clone(), tx).is_some() {
            debug!("Transaction {} replaced an older pending entry", key);
        }
        rx
    }

    pub fn remove(&self, key: &TransactionKey) {
        self.pending.lock().remove(key);
    }

    pub fn deliver(&self, response: SipResponse) -> Delivery {
        let Some(key) = TransactionKey::for_response(&response) else {
            return Delivery::Unmatched;
        };

        let mut pending = self.pending.lock();
        if !pending.contains_key(&key) {
            return Delivery::Unmatched;
        }
        if response.is_provisional() {
            return Delivery::Provisional;
        }
        match pending.remove(&key) {
            Some(tx) => {
                if tx.send(response).is_ok() {
                    Delivery::Delivered
                } else {
                    Delivery::Unmatched
                }
            }
            None => Delivery::Unmatched,
        }
    }

    /// Drop every pending transaction; waiters observe a closed channel
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
