use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a signaling session that both peers provide.
/// It selects the topic both of them publish to and subscribe from.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap String into a `SessionId` `struct`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A session id made only of whitespace cannot name a topic.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for SessionId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one running peer, generated once per process start.
///
/// Identities are compared byte-wise, which gives both peers the same total order
/// without any coordination; see [`offerer`].
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an already known identity, e.g. one read from an [`Envelope`].
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this side creates the offer when paired with `remote`.
    #[must_use]
    pub fn is_offerer_against(&self, remote: &Self) -> bool {
        self.0.as_bytes() < remote.0.as_bytes()
    }
}

impl From<&str> for PeerIdentity {
    fn from(val: &str) -> Self {
        Self(val.to_owned())
    }
}

impl Display for PeerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the peer responsible for creating the offer.
/// The result does not depend on argument order.
#[must_use]
pub fn offerer<'a>(first: &'a PeerIdentity, second: &'a PeerIdentity) -> &'a PeerIdentity {
    if first.is_offerer_against(second) {
        first
    } else {
        second
    }
}

/// One published payload: `"<sender>\n<body>"`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Envelope {
    /// Identity of the publishing peer.
    pub sender: PeerIdentity,
    /// Everything after the first newline.
    pub body: String,
}

impl Envelope {
    /// Text to publish for `body` sent by `sender`.
    #[must_use]
    pub fn encode(sender: &PeerIdentity, body: &str) -> String {
        let mut text = String::with_capacity(sender.as_str().len() + 1 + body.len());
        text.push_str(sender.as_str());
        text.push('\n');
        text.push_str(body);
        text
    }

    /// Splits a received payload on its first newline.
    /// Returns `None` when there is no newline or the sender part is empty.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        let (sender, body) = raw.split_once('\n')?;
        if sender.is_empty() {
            return None;
        }
        Some(Self {
            sender: PeerIdentity::from(sender),
            body: body.to_owned(),
        })
    }
}
