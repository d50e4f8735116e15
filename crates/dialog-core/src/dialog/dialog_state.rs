use std::fmt;

/// Lifecycle of the call dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Created,
    /// Outbound INVITE sent, no response yet
    Inviting,
    /// Provisional response received, or 180 sent for an inbound call
    Ringing,
    Connected,
    Ended,
}

impl DialogState {
    pub fn is_ended(&self) -> bool {
        matches!(self, DialogState::Ended)
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Created => "Created",
            DialogState::Inviting => "Inviting",
            DialogState::Ringing => "Ringing",
            DialogState::Connected => "Connected",
            DialogState::Ended => "Ended",
        };
        f.write_str(name)
    }
}
