//! Configuration for the SIP user agent
//!
//! [`SipOptions`] is immutable for the lifetime of one call attempt. When
//! device settings change it is replaced wholesale through
//! [`UserAgent::reconfigure`](crate::UserAgent::reconfigure).
//!
//! ```rust
//! use intercom_dialog_core::SipOptions;
//!
//! let options = SipOptions::new("sip:ghome@192.168.1.10", "sip:door@192.168.1.30", "192.168.1.10".parse().unwrap())
//!     .with_domain("vendor.example")
//!     .with_lease(600);
//!
//! assert!(options.validate().is_ok());
//! assert_eq!(options.lease(), 600);
//! ```

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use intercom_sip_core::SipUri;
use intercom_sip_transport::TransportType;
use serde::{Deserialize, Serialize};

use crate::errors::{DialogError, DialogResult};
use crate::protocol::RequestHandler;

/// Registration lease used when none (or zero) is configured
pub const DEFAULT_LEASE_SECS: u32 = 300;

/// Bound on REGISTER and BYE transactions
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 3000;

fn default_lease() -> u32 {
    DEFAULT_LEASE_SECS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TRANSACTION_TIMEOUT_MS
}

fn default_user_agent() -> String {
    format!("intercom-relay/{}", env!("CARGO_PKG_VERSION"))
}

/// Per-process identifier that disambiguates this process's contacts.
///
/// Created once by the process bootstrap and handed to every user agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for one call attempt
#[derive(Clone, Serialize, Deserialize)]
pub struct SipOptions {
    /// Remote party, e.g. `sip:door@192.168.1.30:5060`
    pub to: String,

    /// Local identity, e.g. `sip:ghome@192.168.1.10`
    pub from: String,

    #[serde(default)]
    pub transport: TransportType,

    /// Address advertised in Via, Contact and SDP
    pub local_ip: IpAddr,

    /// SIP port to bind; 0 picks an ephemeral port
    #[serde(default)]
    pub local_port: u16,

    /// Domain some devices expect in To/From instead of their IP
    #[serde(default)]
    pub domain: Option<String>,

    /// Registration lease in seconds
    #[serde(default = "default_lease")]
    pub expire: u32,

    /// Log every SIP message at info level
    #[serde(default)]
    pub debug: bool,

    /// Stable instance id enabling GRUU contact parameters
    #[serde(default)]
    pub gruu_instance_id: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_ms")]
    pub register_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub bye_timeout_ms: u64,

    /// Receives inbound MESSAGE, INVITE, CANCEL, ACK and INFO requests
    #[serde(skip)]
    pub handler: Option<Arc<dyn RequestHandler>>,
}

impl SipOptions {
    pub fn new(from: impl Into<String>, to: impl Into<String>, local_ip: IpAddr) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            transport: TransportType::Udp,
            local_ip,
            local_port: 0,
            domain: None,
            expire: DEFAULT_LEASE_SECS,
            debug: false,
            gruu_instance_id: None,
            user_agent: default_user_agent(),
            register_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            bye_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            handler: None,
        }
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_lease(mut self, seconds: u32) -> Self {
        self.expire = seconds;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_gruu_instance_id(mut self, id: impl Into<String>) -> Self {
        self.gruu_instance_id = Some(id.into());
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_bye_timeout(mut self, timeout: Duration) -> Self {
        self.bye_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn to_uri(&self) -> DialogResult<SipUri> {
        self.to
            .parse()
            .map_err(|e| DialogError::configuration(format!("invalid 'to' URI: {}", e)))
    }

    pub fn from_uri(&self) -> DialogResult<SipUri> {
        self.from
            .parse()
            .map_err(|e| DialogError::configuration(format!("invalid 'from' URI: {}", e)))
    }

    /// Registration lease, falling back to the default when unset
    pub fn lease(&self) -> u32 {
        if self.expire == 0 {
            DEFAULT_LEASE_SECS
        } else {
            self.expire
        }
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn bye_timeout(&self) -> Duration {
        Duration::from_millis(self.bye_timeout_ms)
    }

    /// Domain override, ignoring blank values
    pub fn domain_override(&self) -> Option<&str> {
        self.domain.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    pub fn validate(&self) -> DialogResult<()> {
        self.to_uri()?;
        self.from_uri()?;

        if self.local_ip.is_unspecified() {
            return Err(DialogError::configuration(
                "local_ip must be a concrete address, it is advertised to the remote",
            ));
        }
        if self.register_timeout_ms == 0 || self.bye_timeout_ms == 0 {
            return Err(DialogError::configuration("transaction timeouts must be greater than 0"));
        }
        if let Some(domain) = &self.domain {
            if domain.contains(|c: char| c.is_whitespace() || c == ':' || c == '@') {
                return Err(DialogError::configuration(format!("invalid domain '{}'", domain)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SipOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipOptions")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("transport", &self.transport)
            .field("local_ip", &self.local_ip)
            .field("local_port", &self.local_port)
            .field("domain", &self.domain)
            .field("expire", &self.expire)
            .field("debug", &self.debug)
            .field("gruu_instance_id", &self.gruu_instance_id)
            .field("handler", &self.handler.as_ref().map(|_| "<handler>"))
            .finish()
    }
}
