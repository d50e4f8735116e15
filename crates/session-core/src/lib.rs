//! Call sessions for the intercom relay
//!
//! A [`CallSession`] composes a SIP [`UserAgent`](intercom_dialog_core::UserAgent)
//! with four UDP sockets (audio RTP, audio RTCP, video RTP, video RTCP) and
//! runs one call over them:
//!
//! - `call()` places the INVITE, `answer()` accepts an inbound one; a
//!   session starts at most once.
//! - When the remote multiplexes RTCP onto its RTP port the dedicated RTCP
//!   socket is closed and the RTP socket carries both.
//! - Remote ICE credentials select full ICE connectivity checks, otherwise
//!   a STUN binding request keeps NAT bindings open on a fixed interval.
//! - `stop()` hangs up, closes the sockets and publishes
//!   [`SessionEvent::CallEnded`] exactly once, whether it is called once,
//!   twice or never because the device hung up first.
//!
//! Received packets are published as [`SessionEvent`]s for the RTSP bridge
//! and intercom audio to consume.
//!
//! ```rust,no_run
//! use intercom_dialog_core::{default_audio_section, default_video_section, ContactId, SipOptions, UserAgent};
//! use intercom_session_core::{CallSession, SessionConfig, SessionEvent};
//!
//! # async fn example() -> intercom_session_core::Result<()> {
//! let options = SipOptions::new(
//!     "sip:ghome@192.168.1.10",
//!     "sip:door@192.168.1.30:5060",
//!     "192.168.1.10".parse().unwrap(),
//! );
//! let agent = UserAgent::new(options, ContactId::generate()).await?;
//! let session = CallSession::new(agent, SessionConfig::default()).await?;
//! let mut events = session.subscribe()?;
//!
//! session.call(&default_audio_section, &default_video_section).await?;
//! while let Ok(event) = events.receive().await {
//!     if let SessionEvent::RtpPacket { media, packet } = event {
//!         println!("{} packet, {} bytes", media, packet.len());
//!     }
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod manager;
pub mod media;
pub mod session;

pub use config::SessionConfig;
pub use errors::{Result, SessionError};
pub use manager::{SessionEvent, SessionEventProcessor, SessionEventSubscriber};
pub use media::{MediaSocket, MediaSockets, SocketKind};
pub use session::{CallSession, NatStrategy, SessionHealth, StreamHealth};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        CallSession, NatStrategy, Result, SessionConfig, SessionError, SessionEvent, SessionEventSubscriber,
        SessionHealth, SocketKind, StreamHealth,
    };
    pub use intercom_rtp_core::MediaType;
}
