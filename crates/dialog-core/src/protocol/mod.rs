//! Inbound request dispatch and vendor-specific message rewriting

pub mod handler;
pub mod quirks;

pub use handler::{InboundRequest, RequestHandler};
