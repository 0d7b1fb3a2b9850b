/*!
Helper crate that declares the wire types shared by [push-peers](../push_peers/index.html)
and the `push-peers` command line tool.

Everything exchanged over a push-relay topic is text: an [`Envelope`] prefixes the
sender's [`PeerIdentity`] to a body, and the body is one of the [`Signal`] payloads.
 */

#![warn(missing_docs)]

pub mod common;
pub mod signal;

pub use common::{offerer, Envelope, PeerIdentity, SessionId};
pub use signal::{IceCandidate, SdpKind, SessionDescription, Signal, SignalError};
