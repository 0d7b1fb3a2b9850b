/*!
Reader for the relay's server-sent event stream.

The subscription is one long-lived `GET` whose body never completes on its own.
Frames are parsed incrementally as bytes arrive, `open` events resolve the start
signal and `message` events hand their payload to an [`EventHandler`]. The only
way to stop the reader is the `interrupted` flag, polled on every progress tick
of the transport.
 */

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};
use serde_json::Value;

use crate::constants::EVENT_STREAM_CONTENT_TYPE;
use crate::transport::{
    Completion, Connector, Progress, Request, ResponseHead, TransferObserver, Transport,
    TransportError,
};

const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser.
///
/// Accepts bytes in arbitrary chunks; a frame is dispatched at the blank line that
/// ends it. `\r\n` line endings, comment lines and unknown fields are tolerated.
#[derive(Debug, Default)]
pub struct FrameParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl FrameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.pending.iter().position(|&byte| byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            _ => trace!("ignoring event-stream field '{field}'"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data,
            id,
        })
    }
}

/// Receives the outcome of a subscription.
pub trait EventHandler {
    /// Fired exactly once per subscription: `true` on the first `open` event,
    /// `false` if the stream ends without one.
    fn on_started(&mut self, success: bool);

    /// Payload of one `message` event.
    fn on_event(&mut self, payload: String);

    /// Called on every progress tick, also while the stream is idle.
    fn on_tick(&mut self) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

pub struct EventStream<'a, C> {
    transport: &'a Transport<C>,
    url: &'a str,
}

impl<'a, C: Connector> EventStream<'a, C> {
    pub const fn new(transport: &'a Transport<C>, url: &'a str) -> Self {
        Self { transport, url }
    }

    /// Blocks until `interrupted` is set, `handler` stops on a tick or the stream ends.
    ///
    /// # Errors
    /// Errs when the request fails or the response is not an event stream.
    /// `on_started(false)` has been fired in that case.
    pub fn subscribe(
        &self,
        handler: &mut dyn EventHandler,
        interrupted: &AtomicBool,
    ) -> Result<Completion, TransportError> {
        let headers = [("Accept", EVENT_STREAM_CONTENT_TYPE)];
        let mut observer = StreamObserver {
            parser: FrameParser::new(),
            handler,
            interrupted,
            started: false,
        };
        let result = self
            .transport
            .request(&Request::get(self.url, &headers).streaming(), &mut observer);
        if !observer.started {
            observer.handler.on_started(false);
        }
        debug!("subscription to {} ended: {result:?}", self.url);
        result
    }
}

struct StreamObserver<'h> {
    parser: FrameParser,
    handler: &'h mut dyn EventHandler,
    interrupted: &'h AtomicBool,
    started: bool,
}

impl StreamObserver<'_> {
    fn frame(&mut self, frame: Frame) {
        let json = serde_json::from_str::<Value>(&frame.data).ok();
        let kind = json
            .as_ref()
            .and_then(|value| value.get("event"))
            .and_then(Value::as_str)
            .unwrap_or(&frame.event);

        match kind {
            "open" => {
                if !self.started {
                    self.started = true;
                    self.handler.on_started(true);
                }
            }
            "message" => {
                let payload = json
                    .as_ref()
                    .and_then(|value| value.get("message"))
                    .and_then(Value::as_str);
                match payload {
                    Some(payload) => self.handler.on_event(payload.to_owned()),
                    None => warn!("dropping message event without payload: {}", frame.data),
                }
            }
            "keepalive" => trace!("keepalive"),
            other => debug!("dropping '{other}' event"),
        }
    }
}

impl TransferObserver for StreamObserver<'_> {
    fn verify(&mut self, head: &ResponseHead) -> Result<(), String> {
        let content_type = head.content_type.as_deref().unwrap_or_default();
        if content_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with(EVENT_STREAM_CONTENT_TYPE)
        {
            Ok(())
        } else {
            Err(format!("expected {EVENT_STREAM_CONTENT_TYPE}, got '{content_type}'"))
        }
    }

    fn on_data(&mut self, chunk: &[u8]) {
        for frame in self.parser.push(chunk) {
            self.frame(frame);
        }
    }

    fn on_progress(&mut self, _progress: Progress) -> ControlFlow<()> {
        if self.interrupted.load(Ordering::Acquire) {
            return ControlFlow::Break(());
        }
        self.handler.on_tick()
    }
}
