/*!
Boundary to the external media engine.

The engine builds and runs the actual `WebRTC` pipeline (capture, codecs,
ICE/DTLS/SRTP). This crate only drives it through [`MediaEngine`] and learns about
its progress through [`EngineEvent`]s sent with an [`EngineNotifier`]. Results of
asynchronous operations, such as a created offer, come back as events rather
than return values.
 */

use crossbeam_channel::Sender;
use push_peers_protocol::{IceCandidate, SessionDescription};

use crate::call::Inbound;

/// Opaque token of one data channel, chosen by the engine.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ChannelId(pub u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChannelOrigin {
    /// Created by this side.
    Local,
    /// Offered by the remote peer.
    Remote,
}

/// Servers handed to the engine when the pipeline starts.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MediaSettings {
    pub stun_server: String,
    pub turn_server: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Something the engine reports to the running call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EngineEvent {
    /// The pipeline is ready for an offer/answer exchange.
    NegotiationNeeded,
    /// A freshly created local offer or answer, already applied locally.
    LocalDescription(SessionDescription),
    IceCandidate(IceCandidate),
    IceGatheringState(IceGatheringState),
    IceConnectionState(IceConnectionState),
    DataChannelOpened {
        channel: ChannelId,
        origin: ChannelOrigin,
    },
    DataChannelMessage {
        channel: ChannelId,
        text: String,
    },
    DataChannelClosed(ChannelId),
    DataChannelError {
        channel: ChannelId,
        reason: String,
    },
    /// Answer to [`MediaEngine::request_stats`] in whatever textual form the engine has.
    Stats(String),
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("media engine: {0}")]
pub struct MediaError(pub String);

impl MediaError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Operations the call needs from a media engine.
///
/// All methods are called from the call's worker thread, one at a time.
pub trait MediaEngine {
    /// Builds the pipeline. Must eventually report [`EngineEvent::NegotiationNeeded`].
    ///
    /// # Errors
    /// Errs when the pipeline cannot be built.
    fn start(&mut self, settings: &MediaSettings) -> Result<(), MediaError>;

    /// Reports the offer as [`EngineEvent::LocalDescription`].
    ///
    /// # Errors
    /// Errs when offer creation cannot be started.
    fn create_offer(&mut self) -> Result<(), MediaError>;

    /// # Errors
    /// Errs when the description is rejected.
    fn set_remote_description(&mut self, description: &SessionDescription) -> Result<(), MediaError>;

    /// Reports the answer as [`EngineEvent::LocalDescription`].
    ///
    /// # Errors
    /// Errs when answer creation cannot be started.
    fn create_answer(&mut self) -> Result<(), MediaError>;

    /// # Errors
    /// Errs when the candidate is rejected.
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError>;

    /// # Errors
    /// Errs when the channel cannot take the text.
    fn send_text(&mut self, channel: ChannelId, text: &str) -> Result<(), MediaError>;

    /// Asks for an [`EngineEvent::Stats`] report.
    fn request_stats(&mut self) {}

    /// Tears the pipeline down. Called at most once, also when `start` never was.
    fn stop(&mut self);
}

/// Handle the engine uses to report [`EngineEvent`]s; cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct EngineNotifier {
    sender: Sender<Inbound>,
}

impl EngineNotifier {
    pub(crate) const fn new(sender: Sender<Inbound>) -> Self {
        Self { sender }
    }

    /// Queues `event` for the call. Returns `false` once the call has ended.
    pub fn notify(&self, event: EngineEvent) -> bool {
        self.sender.send(Inbound::Engine(event)).is_ok()
    }
}
