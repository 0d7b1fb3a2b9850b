/*!
Publish/subscribe on the one topic of a session.

The relay topic is a broadcast channel: every payload published by a peer is
also delivered back to that peer. [`SignalingChannel`] wraps each published
text into an [`Envelope`] carrying the local identity and drops envelopes with
that identity on the way in, so handlers only ever see the remote side.
 */

use std::ops::ControlFlow;
use std::sync::atomic::AtomicBool;

use log::{debug, trace, warn};
use push_peers_protocol::{Envelope, PeerIdentity, SessionId};

use crate::event_stream::{EventHandler, EventStream};
use crate::transport::{Completion, Connector, Request, Transport, TransportError};

/// Publish and subscribe locations of one session topic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TopicUrls {
    pub publish: String,
    pub subscribe: String,
}

impl TopicUrls {
    #[must_use]
    pub fn new(base: &str, prefix: &str, session: &SessionId) -> Self {
        let publish = format!(
            "{}/{prefix}{}",
            base.trim_end_matches('/'),
            urlencoding::encode(session.as_str().trim())
        );
        let subscribe = format!("{publish}/sse");
        Self { publish, subscribe }
    }
}

/// Where replies go.
pub trait SignalSink {
    /// Publishes `text` as the local peer.
    ///
    /// # Errors
    /// Errs when the text could not be delivered to the relay.
    fn publish(&self, text: &str) -> Result<(), TransportError>;
}

/// Receives messages from the remote side of a topic.
pub trait MessageHandler {
    fn on_started(&mut self, success: bool, sink: &dyn SignalSink);

    fn on_message(&mut self, envelope: Envelope, sink: &dyn SignalSink);

    fn on_tick(&mut self, _sink: &dyn SignalSink) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

pub struct SignalingChannel<C> {
    transport: Transport<C>,
    urls: TopicUrls,
    identity: PeerIdentity,
}

impl<C: Connector> SignalingChannel<C> {
    pub const fn new(transport: Transport<C>, urls: TopicUrls, identity: PeerIdentity) -> Self {
        Self {
            transport,
            urls,
            identity,
        }
    }

    pub const fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub const fn urls(&self) -> &TopicUrls {
        &self.urls
    }

    /// Runs the subscription until `interrupted` is set, `handler` stops on a tick or the
    /// stream ends.
    ///
    /// # Errors
    /// Errs when the subscription request fails; `handler` has seen `on_started(false)`
    /// if the stream never opened.
    pub fn subscribe(
        &self,
        handler: &mut dyn MessageHandler,
        interrupted: &AtomicBool,
    ) -> Result<Completion, TransportError> {
        let mut events = ChannelEvents {
            channel: self,
            handler,
        };
        EventStream::new(&self.transport, &self.urls.subscribe).subscribe(&mut events, interrupted)
    }
}

impl<C: Connector> SignalSink for SignalingChannel<C> {
    fn publish(&self, text: &str) -> Result<(), TransportError> {
        let body = Envelope::encode(&self.identity, text);
        let headers = [("Accept", "application/json")];
        self.transport.request(
            &Request::post(&self.urls.publish, &headers, body.as_bytes()),
            &mut (),
        )?;
        trace!("published {text:?}");
        Ok(())
    }
}

struct ChannelEvents<'a, C> {
    channel: &'a SignalingChannel<C>,
    handler: &'a mut dyn MessageHandler,
}

impl<C: Connector> EventHandler for ChannelEvents<'_, C> {
    fn on_started(&mut self, success: bool) {
        self.handler.on_started(success, self.channel);
    }

    fn on_event(&mut self, payload: String) {
        let Some(envelope) = Envelope::decode(&payload) else {
            warn!("dropping payload without sender: {payload:?}");
            return;
        };
        if envelope.sender == self.channel.identity {
            trace!("dropping own message {:?}", envelope.body);
            return;
        }
        debug!("received {:?} from {}", envelope.body, envelope.sender);
        self.handler.on_message(envelope, self.channel);
    }

    fn on_tick(&mut self) -> ControlFlow<()> {
        self.handler.on_tick(self.channel)
    }
}
