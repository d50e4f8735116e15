//! Call session configuration
//!
//! Only the session's own knobs live here; SIP settings stay in
//! [`SipOptions`](intercom_dialog_core::SipOptions) on the user agent.
//!
//! ```rust
//! use std::time::Duration;
//! use intercom_session_core::SessionConfig;
//!
//! let config = SessionConfig::default().with_keepalive_interval(Duration::from_secs(1));
//! assert!(config.validate().is_ok());
//! assert_eq!(config.keepalive_interval(), Duration::from_secs(1));
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use intercom_ice_core::RetransmitConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SessionError};

/// Interval of the STUN keepalive used when ICE is not negotiated
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 500;

/// Buffered events per subscriber before the slowest one starts lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Times a fresh port run is reserved when binding one of its sockets fails
pub const DEFAULT_BIND_ATTEMPTS: usize = 5;

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_keepalive_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_stun_rto_ms() -> u64 {
    500
}

fn default_stun_attempts() -> u32 {
    3
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_bind_attempts() -> usize {
    DEFAULT_BIND_ATTEMPTS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Address the four media sockets bind to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    #[serde(default = "default_keepalive_ms")]
    pub keepalive_interval_ms: u64,

    /// Initial STUN retransmission timeout, doubled per attempt
    #[serde(default = "default_stun_rto_ms")]
    pub stun_initial_rto_ms: u64,

    #[serde(default = "default_stun_attempts")]
    pub stun_attempts: u32,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: usize,

    /// Offer SRTP with freshly generated key material
    #[serde(default)]
    pub srtp: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            stun_initial_rto_ms: default_stun_rto_ms(),
            stun_attempts: default_stun_attempts(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
            srtp: false,
        }
    }
}

impl SessionConfig {
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_stun_retransmit(mut self, initial_rto: Duration, attempts: u32) -> Self {
        self.stun_initial_rto_ms = initial_rto.as_millis() as u64;
        self.stun_attempts = attempts;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_srtp(mut self, srtp: bool) -> Self {
        self.srtp = srtp;
        self
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn retransmit(&self) -> RetransmitConfig {
        RetransmitConfig {
            initial_rto: Duration::from_millis(self.stun_initial_rto_ms),
            attempts: self.stun_attempts,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.keepalive_interval_ms == 0 {
            return Err(SessionError::configuration("keepalive interval must be greater than 0"));
        }
        if self.stun_initial_rto_ms == 0 || self.stun_attempts == 0 {
            return Err(SessionError::configuration(
                "STUN retransmission needs a positive timeout and at least one attempt",
            ));
        }
        // broadcast::channel panics on a zero capacity
        if self.event_capacity == 0 {
            return Err(SessionError::configuration("event capacity must be greater than 0"));
        }
        if self.bind_attempts == 0 {
            return Err(SessionError::configuration("bind attempts must be greater than 0"));
        }
        Ok(())
    }
}
