use std::fmt;

use crate::error::{Error, Result};

/// Lifecycle of a capture session
///
/// ```text
/// Closed -> Opening -> Negotiating -> Streaming
///              |            |             |
///              v            v             v
///           Closed        Error <---------+
///
/// any state but Closed -> Stopping -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// No device resources are held
    #[default]
    Closed,
    /// The device node is being opened
    Opening,
    /// Formats are being chosen and applied
    Negotiating,
    /// Buffers are mapped and queued, the stream is on
    Streaming,
    /// Resources are being released
    Stopping,
    /// Negotiation failed or the stream went unhealthy, waiting for teardown
    Error,
}

impl State {
    /// Whether the lifecycle allows moving from `self` to `to`
    pub fn can_transition(self, to: State) -> bool {
        use State::*;

        matches!(
            (self, to),
            (Closed, Opening)
                | (Opening, Negotiating)
                | (Opening, Closed)
                | (Negotiating, Streaming)
                | (Negotiating, Error)
                | (Streaming, Error)
                | (Opening, Stopping)
                | (Negotiating, Stopping)
                | (Streaming, Stopping)
                | (Error, Stopping)
                | (Stopping, Stopping)
                | (Stopping, Closed)
        )
    }

    /// Validates a move, returning the new state
    pub fn transition(self, to: State) -> Result<State> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }

    /// Whether the session currently holds device resources or is acquiring them
    pub fn is_active(self) -> bool {
        !matches!(self, State::Closed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "closed",
            State::Opening => "opening",
            State::Negotiating => "negotiating",
            State::Streaming => "streaming",
            State::Stopping => "stopping",
            State::Error => "error",
        };
        f.write_str(name)
    }
}
