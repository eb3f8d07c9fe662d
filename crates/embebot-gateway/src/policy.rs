//! Close classification.

use embebot_core::protocol::close_code;

/// What the session does after its transport closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAction {
    /// Operator asked to stop. Identity is dropped and nothing is scheduled.
    Stop,
    /// The remote refused the session for good. Identity is dropped and
    /// nothing is scheduled.
    Terminal,
    /// Keep identity and reconnect after the configured delay.
    Resume,
}

/// `local` is true when this side initiated the close.
pub fn classify(code: u16, local: bool) -> CloseAction {
    if local && code == close_code::NORMAL {
        CloseAction::Stop
    } else if close_code::is_terminal(code) {
        CloseAction::Terminal
    } else {
        CloseAction::Resume
    }
}

impl CloseAction {
    pub fn clears_identity(self) -> bool {
        matches!(self, Self::Stop | Self::Terminal)
    }
}
