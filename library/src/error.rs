use crate::media::MediaError;
use crate::transport::TransportError;

/// Errors reported to the caller of this crate.
///
/// Failures inside a running call never show up here; they end the call and are
/// reported through [`CallEvent::Ended`](crate::CallEvent::Ended).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session id must not be empty")]
    EmptySession,
    #[error("invalid configuration: {0}")]
    Config(#[from] envy::Error),
    #[error("failed to spawn the signaling worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("call is no longer running")]
    CallEnded,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Signal(#[from] push_peers_protocol::SignalError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
