#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use push_peers::{
    CallConfig, CallEvent, CallState, ChannelId, ChannelOrigin, Connector, EngineEvent,
    EngineNotifier, IceCandidate, IceGatheringState, MediaEngine, MediaError, MediaSettings,
    Method, OpenError, Opened, Request, ResponseHead, SdpKind, SessionDescription, SessionId,
    TransportConfig,
};

pub const TOPIC_BASE: &str = "http://relay.test";
const IDLE_WAIT: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Topics {
    messages: HashMap<String, Vec<String>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<Topics>,
    changed: Condvar,
    connect_failures: AtomicU32,
    attempts: AtomicU32,
}

/// In-memory stand-in for the push relay: `POST` appends to a topic, `GET …/sse`
/// streams the topic's new messages as server-sent events and times reads out
/// while idle.
#[derive(Clone, Default)]
pub struct Relay {
    shared: Arc<Shared>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) {
        self.shared.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Publishes a raw payload, bypassing any identity.
    pub fn inject(&self, topic: &str, payload: &str) {
        let mut topics = self.shared.topics.lock().unwrap();
        topics
            .messages
            .entry(topic.to_owned())
            .or_default()
            .push(payload.to_owned());
        self.shared.changed.notify_all();
    }

    pub fn messages(&self, topic: &str) -> Vec<String> {
        let topics = self.shared.topics.lock().unwrap();
        topics.messages.get(topic).cloned().unwrap_or_default()
    }

    /// Ends every open subscription.
    pub fn close_streams(&self) {
        self.shared.topics.lock().unwrap().closed = true;
        self.shared.changed.notify_all();
    }
}

impl Connector for Relay {
    fn open(&self, request: &Request<'_>) -> Result<Opened, OpenError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let failures = self.shared.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared
                .connect_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(OpenError::Connect("connection refused".to_owned()));
        }

        match request.method {
            Method::Post => {
                let payload = String::from_utf8_lossy(request.body.unwrap_or_default());
                self.inject(request.url, &payload);
                Ok(Opened {
                    head: head(request.url, "application/json"),
                    body: Box::new(Cursor::new(b"{}".to_vec())),
                })
            }
            Method::Get => {
                let Some(topic) = request.url.strip_suffix("/sse") else {
                    return Err(OpenError::Other(format!("no such endpoint {}", request.url)));
                };
                let cursor = self.messages(topic).len();
                Ok(Opened {
                    head: head(request.url, "text/event-stream"),
                    body: Box::new(Feed {
                        shared: Arc::clone(&self.shared),
                        topic: topic.to_owned(),
                        cursor,
                        opened: false,
                        pending: VecDeque::new(),
                    }),
                })
            }
        }
    }
}

fn head(url: &str, content_type: &str) -> ResponseHead {
    ResponseHead {
        status: 200,
        content_type: Some(content_type.to_owned()),
        url: url.to_owned(),
    }
}

struct Feed {
    shared: Arc<Shared>,
    topic: String,
    cursor: usize,
    opened: bool,
    pending: VecDeque<u8>,
}

impl Feed {
    fn fill(&mut self) -> io::Result<bool> {
        if !self.opened {
            self.opened = true;
            self.pending
                .extend(b"event: open\ndata: {\"event\":\"open\"}\n\n".iter());
            return Ok(true);
        }
        let mut topics = self.shared.topics.lock().unwrap();
        for _ in 0..2 {
            if topics.closed {
                return Ok(false);
            }
            let messages = topics.messages.get(&self.topic).map_or(&[][..], Vec::as_slice);
            if messages.len() > self.cursor {
                for message in &messages[self.cursor..] {
                    let data = serde_json::json!({ "event": "message", "message": message });
                    self.pending
                        .extend(format!("data: {data}\n\n").into_bytes());
                }
                self.cursor = messages.len();
                return Ok(true);
            }
            topics = self
                .shared
                .changed
                .wait_timeout(topics, IDLE_WAIT)
                .unwrap()
                .0;
        }
        Err(io::ErrorKind::TimedOut.into())
    }
}

impl Read for Feed {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() && !self.fill()? {
            return Ok(0);
        }
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Call configuration pointing at the in-memory relay with fast ticks.
pub fn config(session: &str) -> CallConfig {
    let mut config = CallConfig::new(SessionId::new(session.to_owned()));
    config.topic_base = TOPIC_BASE.to_owned();
    config.transport = fast_transport();
    config
}

pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        retry_delay_ms: 0,
        poll_interval_ms: 20,
        ..TransportConfig::default()
    }
}

pub fn topic(config: &CallConfig) -> String {
    config.topic_urls().publish
}

/// Lets scripted engines of two peers deliver data-channel text to each other.
#[derive(Clone, Default)]
pub struct Wire {
    peers: Arc<Mutex<Vec<(String, EngineNotifier)>>>,
}

/// Media engine that answers every request immediately with canned events.
pub struct ScriptedEngine {
    name: String,
    notifier: EngineNotifier,
    wire: Wire,
    log: Arc<Mutex<Vec<String>>>,
}

pub const CHANNEL: ChannelId = ChannelId(1);

impl ScriptedEngine {
    pub fn new(name: &str, notifier: EngineNotifier, wire: Wire, log: Arc<Mutex<Vec<String>>>) -> Self {
        wire.peers
            .lock()
            .unwrap()
            .push((name.to_owned(), notifier.clone()));
        Self {
            name: name.to_owned(),
            notifier,
            wire,
            log,
        }
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn describe(&self, kind: SdpKind) {
        self.notifier
            .notify(EngineEvent::LocalDescription(SessionDescription {
                kind,
                sdp: format!("v=0\r\no=- {} IN IP4 127.0.0.1\r\n", self.name),
            }));
    }
}

impl MediaEngine for ScriptedEngine {
    fn start(&mut self, settings: &MediaSettings) -> Result<(), MediaError> {
        self.record(format!("start {}", settings.stun_server));
        self.notifier.notify(EngineEvent::NegotiationNeeded);
        Ok(())
    }

    fn create_offer(&mut self) -> Result<(), MediaError> {
        self.record("create_offer");
        self.describe(SdpKind::Offer);
        self.notifier.notify(EngineEvent::IceCandidate(IceCandidate {
            candidate: format!("candidate:1 1 UDP 2122252543 10.0.0.1 5000 typ host {}", self.name),
            sdp_m_line_index: 0,
        }));
        self.notifier
            .notify(EngineEvent::IceGatheringState(IceGatheringState::Complete));
        Ok(())
    }

    fn set_remote_description(&mut self, description: &SessionDescription) -> Result<(), MediaError> {
        self.record(format!("remote {:?}", description.kind));
        if description.kind == SdpKind::Answer {
            self.notifier.notify(EngineEvent::DataChannelOpened {
                channel: CHANNEL,
                origin: ChannelOrigin::Local,
            });
        }
        Ok(())
    }

    fn create_answer(&mut self) -> Result<(), MediaError> {
        self.record("create_answer");
        self.describe(SdpKind::Answer);
        self.notifier.notify(EngineEvent::DataChannelOpened {
            channel: CHANNEL,
            origin: ChannelOrigin::Remote,
        });
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.record(format!("ice {}", candidate.candidate));
        Ok(())
    }

    fn send_text(&mut self, channel: ChannelId, text: &str) -> Result<(), MediaError> {
        self.record(format!("send {} {text}", channel.0));
        for (name, notifier) in self.wire.peers.lock().unwrap().iter() {
            if *name != self.name {
                notifier.notify(EngineEvent::DataChannelMessage {
                    channel: CHANNEL,
                    text: text.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.record("stop");
    }
}

/// Collects events until one matches `done`; panics after five seconds.
pub fn wait_for(events: &Receiver<CallEvent>, done: impl Fn(&CallEvent) -> bool) -> Vec<CallEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(left)
            .unwrap_or_else(|_| panic!("timed out, saw {seen:?}"));
        let matched = done(&event);
        seen.push(event);
        if matched {
            return seen;
        }
    }
}

pub fn wait_for_state(events: &Receiver<CallEvent>, state: CallState) -> Vec<CallEvent> {
    wait_for(events, |event| *event == CallEvent::StateChanged(state))
}

pub fn wait_for_end(events: &Receiver<CallEvent>) -> (CallState, String) {
    let seen = wait_for(events, |event| matches!(event, CallEvent::Ended { .. }));
    match seen.last() {
        Some(CallEvent::Ended { state, reason }) => (*state, reason.clone()),
        _ => unreachable!(),
    }
}
