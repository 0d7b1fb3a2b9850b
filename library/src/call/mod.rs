/*!
One call attempt: a worker thread running the signaling subscription and the
negotiation state machine, and a [`CallHandle`] for the thread that started it.

Nothing crosses the thread boundary except through queues. The caller receives
[`CallEvent`]s from one outbound queue; engine events and user commands enter
through one inbound queue that the worker drains on every progress tick of the
subscription.

```no_run
use push_peers::{CallConfig, CallEvent, CallSession, SessionId};
# use push_peers::{ChannelId, IceCandidate, MediaEngine, MediaError, MediaSettings, SessionDescription};
# struct Engine;
# impl MediaEngine for Engine {
#     fn start(&mut self, _: &MediaSettings) -> Result<(), MediaError> { Ok(()) }
#     fn create_offer(&mut self) -> Result<(), MediaError> { Ok(()) }
#     fn set_remote_description(&mut self, _: &SessionDescription) -> Result<(), MediaError> { Ok(()) }
#     fn create_answer(&mut self) -> Result<(), MediaError> { Ok(()) }
#     fn add_ice_candidate(&mut self, _: &IceCandidate) -> Result<(), MediaError> { Ok(()) }
#     fn send_text(&mut self, _: ChannelId, _: &str) -> Result<(), MediaError> { Ok(()) }
#     fn stop(&mut self) {}
# }

let config = CallConfig::new(SessionId::new("my-room".to_string()));
let call = CallSession::start(config, |_notifier| Engine).unwrap();
for event in call.events() {
    match event {
        CallEvent::StateChanged(state) => println!("{state}"),
        CallEvent::Message { text, .. } => println!("peer: {text}"),
        CallEvent::Ended { reason, .. } => {
            println!("ended: {reason}");
            break;
        }
    }
}
call.hang_up().unwrap();
```
 */

mod negotiator;
mod state;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use push_peers_protocol::PeerIdentity;

pub use negotiator::Negotiator;
pub use state::CallState;

use crate::config::CallConfig;
use crate::constants::WORKER_THREAD_NAME;
use crate::media::{ChannelId, EngineEvent, EngineNotifier, MediaEngine};
use crate::transport::{Connector, UreqConnector};
use crate::{Error, Result};

/// Request from the caller to the running call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    /// Chat text for the bound data channel.
    SendText(String),
}

/// Everything the worker consumes besides relay messages.
#[derive(Debug)]
pub enum Inbound {
    Engine(EngineEvent),
    Command(Command),
}

/// What the caller observes of a call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CallEvent {
    StateChanged(CallState),
    /// Text received on the bound data channel.
    Message { channel: ChannelId, text: String },
    /// Sent exactly once, as the last event of a call.
    Ended { state: CallState, reason: String },
}

/// Entry point for starting calls.
pub struct CallSession;

impl CallSession {
    /// Starts a call with a fresh identity on the public relay.
    ///
    /// `build_engine` runs on the worker thread and receives the notifier the engine
    /// reports its events with.
    ///
    /// # Errors
    /// Errs when the session id is blank or the worker thread cannot be spawned.
    pub fn start<E, F>(config: CallConfig, build_engine: F) -> Result<CallHandle>
    where
        E: MediaEngine,
        F: FnOnce(EngineNotifier) -> E + Send + 'static,
    {
        let connector = UreqConnector::new(&config.transport);
        Self::start_with(config, connector, PeerIdentity::generate(), build_engine)
    }

    /// Like [`CallSession::start`] with a custom [`Connector`] and a fixed identity.
    ///
    /// # Errors
    /// Errs when the session id is blank or the worker thread cannot be spawned.
    pub fn start_with<C, E, F>(
        config: CallConfig,
        connector: C,
        identity: PeerIdentity,
        build_engine: F,
    ) -> Result<CallHandle>
    where
        C: Connector + 'static,
        E: MediaEngine,
        F: FnOnce(EngineNotifier) -> E + Send + 'static,
    {
        config.validate()?;
        let (event_sender, events) = unbounded();
        let (inbound, inbound_receiver) = unbounded();
        let interrupted = Arc::new(AtomicBool::new(false));

        let notifier = EngineNotifier::new(inbound.clone());
        let worker = worker::Worker {
            config,
            connector,
            identity: identity.clone(),
            inbound: inbound_receiver,
            events: event_sender,
            interrupted: Arc::clone(&interrupted),
        };
        let join_handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || worker.run(build_engine(notifier)))
            .map_err(Error::Spawn)?;

        Ok(CallHandle {
            identity,
            events,
            inbound,
            interrupted,
            worker: Mutex::new(Some(join_handle)),
        })
    }
}

/// Owner side of a running call. Dropping it hangs up.
pub struct CallHandle {
    identity: PeerIdentity,
    events: Receiver<CallEvent>,
    inbound: Sender<Inbound>,
    interrupted: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CallHandle {
    pub const fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Ordered queue of everything that happens to the call.
    pub const fn events(&self) -> &Receiver<CallEvent> {
        &self.events
    }

    /// Whether neither side has ended the call yet.
    pub fn is_running(&self) -> bool {
        !self.interrupted.load(Ordering::Acquire)
    }

    /// Queues chat text for the peer. Empty text is ignored.
    ///
    /// # Errors
    /// Errs with [`Error::CallEnded`] once the call is over.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_running() {
            return Err(Error::CallEnded);
        }
        self.inbound
            .send(Inbound::Command(Command::SendText(text)))
            .map_err(|_| Error::CallEnded)
    }

    /// Interrupts the subscription and waits for the worker to stop the engine.
    /// Once the subscription is open this returns within about one poll interval.
    /// While the relay is still being connected to, it waits until the current
    /// connect attempt and its retries settle. Later calls return immediately.
    ///
    /// # Errors
    /// Errs if the worker thread panicked.
    pub fn hang_up(&self) -> Result<()> {
        self.interrupted.store(true, Ordering::Release);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return Ok(());
        };
        debug!("waiting for the signaling worker");
        worker
            .join()
            .map_err(|_| Error::Other(anyhow!("signaling worker panicked")))
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if let Err(err) = self.hang_up() {
            error!("{err}");
        }
    }
}
