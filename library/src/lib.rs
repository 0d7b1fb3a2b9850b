/*!
This crate connects two peers for a `WebRTC` call using nothing but a public
push-notification relay ([ntfy](https://ntfy.sh)) as the signaling server.

# Overview

Both peers know a session id and nothing else about each other. Each one subscribes
to the relay topic derived from that id, announces itself with `SYN` and answers
the other's `SYN` with `ACK`. Once both are present, the peer with the smaller
identity creates the offer, and the SDP offer/answer and the ICE candidates travel
over the same topic until the media engine takes over.

The media pipeline itself is not part of this crate. It is plugged in through the
[`MediaEngine`] trait and reports back through an [`EngineNotifier`]. Starting a call
is done with [`CallSession::start`], which returns a [`CallHandle`] for observing the
call, sending chat text over the data channel and hanging up.

The building blocks are public as well: a [`Transport`] with connection retries, an
[`EventStream`] reader for the relay's server-sent events, a [`SignalingChannel`] that
filters out our own messages, the [`Rendezvous`] handshake and the [`Negotiator`]
state machine.
*/

#![allow(clippy::module_name_repetitions)]
// clippy WARN level lints
#![warn(
    clippy::cargo,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::float_arithmetic,
    clippy::modulo_arithmetic,
    clippy::as_conversions,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::create_dir,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::float_cmp_const,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::separated_literal_suffix,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads
)]

mod bridge;
mod call;
mod config;
pub(crate) mod constants;
mod error;
mod event_stream;
mod ice;
mod media;
mod rendezvous;
mod signaling;
mod transport;

pub use bridge::DataChannelBridge;
pub use call::{CallEvent, CallHandle, CallSession, CallState, Command, Negotiator};
pub use config::{CallConfig, TransportConfig};
pub use error::{Error, Result};
pub use event_stream::{EventHandler, EventStream, Frame, FrameParser};
pub use ice::IceBatcher;
pub use media::{
    ChannelId, ChannelOrigin, EngineEvent, EngineNotifier, IceConnectionState, IceGatheringState,
    MediaEngine, MediaError, MediaSettings,
};
pub use push_peers_protocol::{
    offerer, Envelope, IceCandidate, PeerIdentity, SdpKind, SessionDescription, SessionId, Signal,
    SignalError,
};
pub use rendezvous::{Handshake, Rendezvous, Step};
pub use signaling::{MessageHandler, SignalSink, SignalingChannel, TopicUrls};
pub use transport::{
    Completion, Connector, Method, OpenError, Opened, Progress, Request, ResponseHead,
    TransferObserver, Transport, TransportError, UreqConnector,
};
