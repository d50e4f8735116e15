//! Minimal SIP user agent for embedded intercom devices
//!
//! One [`UserAgent`] talks to one device. It can register, place an outbound
//! call or accept an inbound one, exchange MESSAGE and INFO requests and hang
//! up. Only the subset of RFC 3261 these devices speak is implemented: there
//! is no transaction-layer retransmission, no proxy or registrar behaviour
//! and no TLS.
//!
//! ## Dialog
//!
//! A single call dialog lives inside the agent. Its Call-ID and local tag are
//! fixed when it is created and the remote tag is learned from the first
//! message carrying one. CSeq numbers grow monotonically; ACK reuses the
//! number of the INVITE it acknowledges.
//!
//! ## Transactions
//!
//! Each outbound request registers a waiter keyed by Call-ID, CSeq number
//! and method before it is sent. The transport receive loop hands the first
//! final response to that waiter. REGISTER and BYE are bounded by a timeout,
//! INVITE and MESSAGE are not.
//!
//! ## Inbound requests
//!
//! BYE and OPTIONS are answered by the agent. INVITE, ACK, CANCEL, MESSAGE,
//! INFO and REGISTER are passed to the [`RequestHandler`] configured in
//! [`SipOptions`].
//!
//! ```rust,no_run
//! use intercom_dialog_core::{ContactId, SipOptions, UserAgent};
//!
//! # async fn example() -> intercom_dialog_core::DialogResult<()> {
//! let options = SipOptions::new(
//!     "sip:ghome@192.168.1.10",
//!     "sip:door@192.168.1.30:5060",
//!     "192.168.1.10".parse().unwrap(),
//! );
//! let agent = UserAgent::new(options, ContactId::generate()).await?;
//! agent.register().await?;
//! let response = agent.message("open_door").await?;
//! println!("device answered {}", response.status);
//! agent.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod dialog;
pub mod errors;
pub mod manager;
pub mod protocol;
pub mod sdp;
pub mod transaction;

pub use api::{ContactId, SipOptions};
pub use dialog::{Dialog, DialogState};
pub use errors::{DialogError, DialogResult};
pub use manager::UserAgent;
pub use protocol::{InboundRequest, RequestHandler};
pub use sdp::{build_local_sdp, default_audio_section, default_video_section, SectionBuilder};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        ContactId, Dialog, DialogError, DialogResult, DialogState, InboundRequest, RequestHandler,
        SectionBuilder, SipOptions, UserAgent,
    };
}
