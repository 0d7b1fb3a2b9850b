use std::fmt::{Display, Formatter};

/// Progress of one call attempt. Declaration order is the progression order,
/// so `state >= CallState::Negotiating` reads as "negotiation reached".
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum CallState {
    #[default]
    Idle,
    ServerConnecting,
    ServerConnectionError,
    ServerConnected,
    PeerConnecting,
    PeerConnected,
    Negotiating,
    CallStarted,
    CallStopping,
    CallStopped,
    CallError,
}

impl CallState {
    /// States a call attempt never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ServerConnectionError | Self::CallStopped | Self::CallError
        )
    }

    /// Whether the state reports a failure.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::ServerConnectionError | Self::CallError)
    }
}

impl Display for CallState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::ServerConnecting => "connecting to relay",
            Self::ServerConnectionError => "relay connection failed",
            Self::ServerConnected => "connected to relay",
            Self::PeerConnecting => "waiting for peer",
            Self::PeerConnected => "peer connected",
            Self::Negotiating => "negotiating",
            Self::CallStarted => "call started",
            Self::CallStopping => "stopping",
            Self::CallStopped => "stopped",
            Self::CallError => "call failed",
        };
        f.write_str(text)
    }
}
