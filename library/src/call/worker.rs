use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use push_peers_protocol::{Envelope, PeerIdentity};

use crate::call::{CallEvent, CallState, Inbound, Negotiator};
use crate::config::CallConfig;
use crate::media::MediaEngine;
use crate::rendezvous::{Rendezvous, Step};
use crate::signaling::{MessageHandler, SignalSink, SignalingChannel};
use crate::transport::{Connector, Transport};

pub(super) struct Worker<C> {
    pub config: CallConfig,
    pub connector: C,
    pub identity: PeerIdentity,
    pub inbound: Receiver<Inbound>,
    pub events: Sender<CallEvent>,
    pub interrupted: Arc<AtomicBool>,
}

impl<C: Connector> Worker<C> {
    /// Body of the signaling thread: subscribes, pairs, negotiates and finally
    /// stops the engine. Returns once the call is over.
    pub fn run<E: MediaEngine>(self, engine: E) {
        let Self {
            config,
            connector,
            identity,
            inbound,
            events,
            interrupted,
        } = self;
        let poll_interval = config.transport.poll_interval();
        let transport = Transport::with_connector(connector, config.transport.clone());
        let channel = SignalingChannel::new(transport, config.topic_urls(), identity.clone());
        info!("joining {} as {identity}", channel.urls().publish);

        let mut driver = Driver {
            negotiator: Negotiator::new(engine, &config, events, Arc::clone(&interrupted)),
            rendezvous: Rendezvous::new(identity),
            inbound,
            opened: false,
        };
        driver.negotiator.connecting();

        let failure = match channel.subscribe(&mut driver, &interrupted) {
            Ok(completion) => {
                debug!("subscription completed: {completion:?}");
                None
            }
            Err(err) => {
                warn!("subscription failed: {err}");
                Some(err.to_string())
            }
        };

        if !driver.negotiator.is_finished() && !interrupted.load(Ordering::Acquire) {
            if !driver.opened {
                let reason = failure.unwrap_or_else(|| "relay stream never opened".to_owned());
                driver
                    .negotiator
                    .teardown(CallState::ServerConnectionError, reason);
            } else if driver.negotiator.state() < CallState::CallStarted {
                let reason = failure.unwrap_or_else(|| {
                    "relay stream closed before the call was established".to_owned()
                });
                driver.negotiator.teardown(CallState::CallError, reason);
            } else {
                info!("relay stream closed, call continues without signaling");
                while !interrupted.load(Ordering::Acquire) && !driver.negotiator.is_finished() {
                    match driver.inbound.recv_timeout(poll_interval) {
                        Ok(item) => driver.dispatch(item, &channel),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    driver.negotiator.tick(Instant::now());
                }
            }
        }
        driver.negotiator.finish("hung up");
    }
}

struct Driver<E> {
    negotiator: Negotiator<E>,
    rendezvous: Rendezvous,
    inbound: Receiver<Inbound>,
    opened: bool,
}

impl<E: MediaEngine> Driver<E> {
    fn dispatch(&mut self, item: Inbound, sink: &dyn SignalSink) {
        match item {
            Inbound::Engine(event) => self.negotiator.handle_engine_event(event, sink),
            Inbound::Command(command) => self.negotiator.handle_command(command),
        }
    }
}

impl<E: MediaEngine> MessageHandler for Driver<E> {
    fn on_started(&mut self, success: bool, sink: &dyn SignalSink) {
        if !success {
            debug!("relay stream did not open");
            return;
        }
        self.opened = true;
        self.negotiator.server_connected();
        if let Err(err) = self.rendezvous.begin(sink) {
            warn!("failed to announce ourselves: {err}");
        }
        self.negotiator.awaiting_peer();
    }

    fn on_message(&mut self, envelope: Envelope, sink: &dyn SignalSink) {
        match self.rendezvous.on_message(envelope, sink) {
            Step::Ignored => {}
            Step::Connected { offerer } => self.negotiator.peer_connected(offerer),
            Step::Forward(body) => self.negotiator.handle_text(&body),
        }
    }

    fn on_tick(&mut self, sink: &dyn SignalSink) -> ControlFlow<()> {
        while let Ok(item) = self.inbound.try_recv() {
            self.dispatch(item, sink);
        }
        self.negotiator.tick(Instant::now());
        if self.negotiator.is_finished() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
