//! Call session: the user agent plus its media sockets

pub mod nat;
mod receiver;
pub mod session;

pub use nat::NatStrategy;
pub use session::{CallSession, SessionHealth, StreamHealth};
