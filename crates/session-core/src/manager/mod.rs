//! Event fan-out for call sessions

pub mod events;

pub use events::{SessionEvent, SessionEventProcessor, SessionEventSubscriber};
