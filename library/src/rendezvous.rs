/*!
Two-way `SYN`/`ACK` handshake that pairs two anonymous peers on a topic.

Each side publishes `SYN` as soon as its subscription is live and answers every
`SYN` of the remote peer with `ACK`. Whichever of the two arrives first tells a
side that the other one is listening. The first sender seen on the topic becomes
the remote peer for the rest of the call; messages from any other identity are
ignored.
 */

use log::{debug, info, warn};
use push_peers_protocol::{Envelope, PeerIdentity, Signal};

use crate::signaling::SignalSink;
use crate::transport::TransportError;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Handshake {
    AwaitingPeer,
    PeerKnown(PeerIdentity),
}

/// What the caller has to do with a received message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    /// Sender is not the paired peer, or a repeated handshake message.
    Ignored,
    /// First `SYN` or `ACK` from the peer; `offerer` tells whether the local side creates the offer.
    Connected { offerer: bool },
    /// Negotiation payload for the state machine.
    Forward(String),
}

#[derive(Debug)]
pub struct Rendezvous {
    local: PeerIdentity,
    handshake: Handshake,
    connected: bool,
}

impl Rendezvous {
    #[must_use]
    pub const fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            handshake: Handshake::AwaitingPeer,
            connected: false,
        }
    }

    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn remote(&self) -> Option<&PeerIdentity> {
        match &self.handshake {
            Handshake::PeerKnown(remote) => Some(remote),
            Handshake::AwaitingPeer => None,
        }
    }

    /// Announces the local peer on the topic.
    ///
    /// # Errors
    /// Errs when `SYN` could not be published.
    pub fn begin(&self, sink: &dyn SignalSink) -> Result<(), TransportError> {
        sink.publish(&control(&Signal::Syn))
    }

    pub fn on_message(&mut self, envelope: Envelope, sink: &dyn SignalSink) -> Step {
        match &self.handshake {
            Handshake::AwaitingPeer => {
                info!("paired with {}", envelope.sender);
                self.handshake = Handshake::PeerKnown(envelope.sender.clone());
            }
            Handshake::PeerKnown(remote) if *remote != envelope.sender => {
                debug!("ignoring {} while paired with {remote}", envelope.sender);
                return Step::Ignored;
            }
            Handshake::PeerKnown(_) => {}
        }

        let signal = match Signal::parse(&envelope.body) {
            Ok(signal) if signal.is_handshake() => signal,
            _ => return Step::Forward(envelope.body),
        };
        if signal == Signal::Syn {
            if let Err(err) = sink.publish(&control(&Signal::Ack)) {
                warn!("failed to answer SYN: {err}");
            }
        }
        if self.connected {
            return Step::Ignored;
        }
        self.connected = true;
        Step::Connected {
            offerer: self.local.is_offerer_against(&envelope.sender),
        }
    }
}

fn control(signal: &Signal) -> String {
    // control strings never fail to serialize
    signal.to_body().unwrap_or_default()
}
