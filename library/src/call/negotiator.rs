use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, error, info, trace, warn};
use push_peers_protocol::{IceCandidate, SdpKind, SessionDescription, Signal, SignalError};

use crate::bridge::DataChannelBridge;
use crate::call::{CallEvent, CallState, Command};
use crate::config::CallConfig;
use crate::ice::IceBatcher;
use crate::media::{
    EngineEvent, IceConnectionState, IceGatheringState, MediaEngine, MediaError, MediaSettings,
};
use crate::signaling::SignalSink;

#[derive(Debug, Clone, Copy)]
struct Pipeline {
    create_offer: bool,
}

#[derive(Debug)]
struct StatsPoller {
    interval: Duration,
    next: Instant,
}

/// Owns the state of one call attempt and drives the media engine through it.
///
/// Every input (relay messages, engine events, user commands, ticks) arrives on
/// the worker thread, so no method here needs synchronization. The only shared
/// values are the outbound event queue and the `interrupted` flag.
pub struct Negotiator<E> {
    engine: E,
    settings: MediaSettings,
    state: CallState,
    offerer: Option<bool>,
    pipeline: Option<Pipeline>,
    local_offer: bool,
    remote_offer: bool,
    request_remote_offer: bool,
    ice: IceBatcher,
    bridge: DataChannelBridge,
    stats_interval: Option<Duration>,
    stats: Option<StatsPoller>,
    events: Sender<CallEvent>,
    interrupted: Arc<AtomicBool>,
    finished: bool,
    engine_stopped: bool,
}

impl<E: MediaEngine> Negotiator<E> {
    pub fn new(
        engine: E,
        config: &CallConfig,
        events: Sender<CallEvent>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            settings: config.media_settings(),
            state: CallState::Idle,
            offerer: None,
            pipeline: None,
            local_offer: false,
            remote_offer: false,
            request_remote_offer: config.request_remote_offer,
            ice: IceBatcher::new(),
            bridge: DataChannelBridge::new(),
            stats_interval: config.stats_interval(),
            stats: None,
            events,
            interrupted,
            finished: false,
            engine_stopped: false,
        }
    }

    pub const fn state(&self) -> CallState {
        self.state
    }

    /// `Some(true)` once the handshake picked this side to create the offer.
    pub const fn offerer(&self) -> Option<bool> {
        self.offerer
    }

    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub fn connecting(&mut self) {
        self.set_state(CallState::ServerConnecting);
    }

    pub fn server_connected(&mut self) {
        self.set_state(CallState::ServerConnected);
    }

    pub fn awaiting_peer(&mut self) {
        self.set_state(CallState::PeerConnecting);
    }

    /// Handshake completed; the offerer starts its pipeline right away, the
    /// other side waits for the offer.
    pub fn peer_connected(&mut self, offerer: bool) {
        if self.finished || self.state >= CallState::PeerConnected {
            return;
        }
        self.set_state(CallState::PeerConnected);
        self.offerer = Some(offerer);
        info!(
            "this side {} the offer",
            if offerer { "creates" } else { "waits for" }
        );
        if offerer && self.start_pipeline(true) {
            self.set_state(CallState::Negotiating);
        }
    }

    /// Applies one negotiation message from the remote peer. Malformed messages are
    /// logged and leave the call untouched.
    pub fn handle_text(&mut self, text: &str) {
        if self.finished {
            trace!("call finished, ignoring {text:?}");
            return;
        }
        match Signal::parse(text) {
            Ok(Signal::OfferRequest) => self.on_offer_request(),
            Ok(Signal::Error(reason)) => {
                let state = if self.state == CallState::ServerConnecting {
                    CallState::ServerConnectionError
                } else {
                    CallState::CallError
                };
                self.teardown(state, reason);
            }
            Ok(Signal::Sdp(description)) => match description.kind {
                SdpKind::Offer => self.on_offer(&description),
                SdpKind::Answer => self.on_answer(&description),
            },
            Ok(Signal::Ice(candidates)) => self.on_remote_candidates(&candidates),
            Ok(Signal::Syn | Signal::Ack) => debug!("late handshake message {text:?}"),
            Err(SignalError::MissingSdpType) => {
                self.teardown(CallState::CallError, "received SDP without 'type'");
            }
            Err(err) => warn!("ignoring message {text:?}: {err}"),
        }
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent, sink: &dyn SignalSink) {
        if self.finished {
            trace!("call finished, ignoring {event:?}");
            return;
        }
        match event {
            EngineEvent::NegotiationNeeded => self.on_negotiation_needed(sink),
            EngineEvent::LocalDescription(description) => {
                self.send_description(&description, sink);
            }
            EngineEvent::IceCandidate(IceCandidate {
                candidate,
                sdp_m_line_index,
            }) => self.ice.add(sdp_m_line_index, candidate),
            EngineEvent::IceGatheringState(IceGatheringState::Complete) => {
                self.ice.flush_on_gathering_complete(sink);
            }
            EngineEvent::IceGatheringState(state) => debug!("ICE gathering {state:?}"),
            EngineEvent::IceConnectionState(IceConnectionState::Failed) => {
                warn!("ICE connection failed");
            }
            EngineEvent::IceConnectionState(state) => info!("ICE connection {state:?}"),
            EngineEvent::DataChannelOpened { channel, origin } => {
                self.bridge.on_channel_open(channel, origin);
            }
            EngineEvent::DataChannelMessage { channel, text } => {
                if self.bridge.accept_inbound(channel) {
                    self.emit(CallEvent::Message { channel, text });
                } else {
                    debug!("ignoring text from unbound data channel {channel:?}");
                }
            }
            EngineEvent::DataChannelClosed(channel) => {
                if self.bridge.on_channel_closed(channel) {
                    self.teardown(CallState::CallStopped, "data channel closed");
                }
            }
            EngineEvent::DataChannelError { channel, reason } => {
                if self.bridge.on_channel_closed(channel) {
                    self.teardown(CallState::CallError, format!("data channel error: {reason}"));
                }
            }
            EngineEvent::Stats(report) => trace!("stats: {report}"),
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendText(text) => {
                if self.finished {
                    debug!("call finished, dropping outbound text");
                    return;
                }
                let Some(channel) = self.bridge.outbound() else {
                    warn!("no data channel yet, dropping outbound text");
                    return;
                };
                if let Err(err) = self.engine.send_text(channel, &text) {
                    warn!("sending text failed: {err}");
                }
            }
        }
    }

    /// Periodic work driven by the transport's progress ticks.
    pub fn tick(&mut self, now: Instant) {
        if let Some(stats) = &mut self.stats {
            if now >= stats.next {
                stats.next = now + stats.interval;
                self.engine.request_stats();
            }
        }
    }

    /// Ends the call attempt in `state`. Only the first call has an effect.
    pub fn teardown(&mut self, state: CallState, reason: impl Into<String>) {
        if self.finished {
            return;
        }
        let reason = reason.into();
        if state.is_error() {
            error!("call ended: {reason}");
        } else {
            info!("call ended: {reason}");
        }
        self.set_state(state);
        self.finished = true;
        self.stats = None;
        self.ice.clear();
        self.bridge.detach();
        self.interrupted.store(true, Ordering::Release);
        self.emit(CallEvent::Ended {
            state: self.state,
            reason,
        });
    }

    /// Stops the media engine and ends the call as stopped unless it already ended.
    pub fn finish(&mut self, reason: &str) {
        if !self.finished {
            self.set_state(CallState::CallStopping);
        }
        if !self.engine_stopped {
            self.engine_stopped = true;
            self.engine.stop();
        }
        self.teardown(CallState::CallStopped, reason);
    }

    fn set_state(&mut self, state: CallState) {
        if self.state == state || self.state.is_terminal() {
            return;
        }
        debug!("call state {} -> {}", self.state, state);
        self.state = state;
        self.emit(CallEvent::StateChanged(state));
    }

    /// Events are dropped once the caller let go of the receiving end.
    fn emit(&self, event: CallEvent) {
        if self.events.send(event).is_err() {
            trace!("no one listens for call events anymore");
        }
    }

    fn fail(&mut self, context: &str, err: &MediaError) {
        self.teardown(CallState::CallError, format!("{context}: {err}"));
    }

    fn start_pipeline(&mut self, create_offer: bool) -> bool {
        if let Err(err) = self.engine.start(&self.settings) {
            self.fail("failed to start pipeline", &err);
            return false;
        }
        self.pipeline = Some(Pipeline { create_offer });
        self.stats = self.stats_interval.map(|interval| StatsPoller {
            interval,
            next: Instant::now() + interval,
        });
        true
    }

    fn on_offer_request(&mut self) {
        let ready = matches!(
            self.state,
            CallState::ServerConnected | CallState::PeerConnecting | CallState::PeerConnected
        );
        if !ready || self.pipeline.is_some() {
            warn!("received OFFER_REQUEST at a strange time ({}), ignoring", self.state);
            return;
        }
        info!("received OFFER_REQUEST, creating the offer");
        if self.start_pipeline(true) {
            self.set_state(CallState::Negotiating);
        }
    }

    fn on_offer(&mut self, description: &SessionDescription) {
        if self.state >= CallState::CallStarted || self.local_offer {
            self.teardown(CallState::CallError, "received an offer outside negotiation");
            return;
        }
        if self.pipeline.is_none() && !self.start_pipeline(false) {
            return;
        }
        self.remote_offer = true;
        self.set_state(CallState::Negotiating);
        if let Err(err) = self.engine.set_remote_description(description) {
            self.fail("failed to apply the offer", &err);
            return;
        }
        if let Err(err) = self.engine.create_answer() {
            self.fail("failed to create the answer", &err);
        }
    }

    fn on_answer(&mut self, description: &SessionDescription) {
        if self.state != CallState::Negotiating || !self.local_offer {
            self.teardown(CallState::CallError, "received an answer without an offer");
            return;
        }
        if let Err(err) = self.engine.set_remote_description(description) {
            self.fail("failed to apply the answer", &err);
            return;
        }
        self.set_state(CallState::CallStarted);
    }

    fn on_remote_candidates(&mut self, candidates: &[IceCandidate]) {
        if self.pipeline.is_none() {
            warn!("no pipeline yet, ignoring {} ICE candidates", candidates.len());
            return;
        }
        for candidate in candidates {
            if let Err(err) = self.engine.add_ice_candidate(candidate) {
                warn!("rejected ICE candidate {:?}: {err}", candidate.candidate);
            }
        }
    }

    fn on_negotiation_needed(&mut self, sink: &dyn SignalSink) {
        let Some(pipeline) = self.pipeline else {
            warn!("negotiation needed without a pipeline, ignoring");
            return;
        };
        if self.state < CallState::Negotiating {
            self.set_state(CallState::Negotiating);
        }
        if !pipeline.create_offer || self.local_offer || self.remote_offer {
            return;
        }
        if self.request_remote_offer {
            let body = Signal::OfferRequest.to_body().unwrap_or_default();
            if let Err(err) = sink.publish(&body) {
                warn!("failed to request an offer: {err}");
            }
            return;
        }
        self.local_offer = true;
        if let Err(err) = self.engine.create_offer() {
            self.fail("failed to create the offer", &err);
        }
    }

    fn send_description(&mut self, description: &SessionDescription, sink: &dyn SignalSink) {
        if self.state < CallState::Negotiating {
            self.teardown(CallState::CallError, "can't send SDP to peer, not in call");
            return;
        }
        let body = match Signal::Sdp(description.clone()).to_body() {
            Ok(body) => body,
            Err(err) => {
                self.teardown(CallState::CallError, format!("failed to encode SDP: {err}"));
                return;
            }
        };
        if let Err(err) = sink.publish(&body) {
            self.teardown(CallState::CallError, format!("failed to send SDP: {err}"));
            return;
        }
        info!("sent {:?}", description.kind);
        if description.kind == SdpKind::Answer {
            self.set_state(CallState::CallStarted);
        }
    }
}
