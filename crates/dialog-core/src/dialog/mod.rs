//! Dialog identity and state
//!
//! ```text
//! Created → Inviting → Ringing (1xx) → Connected (2xx) → Ended
//! Created → Ringing (180 sent) → Connected (200 sent) → Ended
//! ```
//!
//! CANCEL and BYE end the dialog from any state.

pub mod dialog_impl;
pub mod dialog_state;

pub use dialog_impl::{Dialog, Registration};
pub use dialog_state::DialogState;
