use crate::error::SessionError;
use std::fmt;

/// Lifecycle of a session.
///
/// ```text
/// Unopened -> Opening -> Ready -> Closing -> Closed
///                |
///                +-> Unopened   (port failed to open)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Opening => "opening",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Fails with [`SessionError::InvalidState`] unless the session is in `want`.
    pub(crate) fn require(self, op: &'static str, want: SessionState) -> Result<(), SessionError> {
        if self == want {
            Ok(())
        } else {
            Err(SessionError::InvalidState { op, state: self })
        }
    }
}
