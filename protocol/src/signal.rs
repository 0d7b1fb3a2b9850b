/*!
Signaling payloads carried inside an [`Envelope`](crate::Envelope) body.

Two categories share one text channel: plain control strings used for the
rendezvous handshake (`SYN`, `ACK`, `OFFER_REQUEST`, `ERROR…`) and JSON objects
used to set up the `WebRTC` connection afterwards (`{"sdp": …}` and `{"ice": […]}`).
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

const SYN: &str = "SYN";
const ACK: &str = "ACK";
const OFFER_REQUEST: &str = "OFFER_REQUEST";
const ERROR_PREFIX: &str = "ERROR";

/// Which half of an offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Created by the offerer.
    Offer,
    /// Created in reply to an offer.
    Answer,
}

/// `SDP` text together with its kind, passed between peers without modifications.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw `SDP` text.
    pub sdp: String,
}

/// Proposed ICE Candidate of one peer passed to the other peer without modifications.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line as produced by the local ICE agent.
    pub candidate: String,
    /// Index of the media line the candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

/// Everything a peer can say over the topic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Signal {
    /// Rendezvous opening, sent once the subscription is live.
    Syn,
    /// Reply to a `SYN` from the remote peer.
    Ack,
    /// Asks the remote peer to create the offer.
    OfferRequest,
    /// Remote failure report; the full text including the `ERROR` prefix.
    Error(String),
    /// Local description of the sending peer.
    Sdp(SessionDescription),
    /// Every ICE candidate gathered by the sending peer, in gathering order.
    Ice(Vec<IceCandidate>),
}

/// Reasons a body could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The body is neither a control string nor valid JSON.
    #[error("not a control string nor JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("JSON message is not an object")]
    NotAnObject,
    /// `sdp` object without a `type` member.
    #[error("received SDP without 'type'")]
    MissingSdpType,
    /// `type` other than `offer` or `answer`.
    #[error("unknown SDP type '{0}'")]
    UnknownSdpType(String),
    /// `sdp` member of the wrong shape.
    #[error("malformed SDP message: {0}")]
    MalformedSdp(&'static str),
    /// `ice` member that is not a list of candidates.
    #[error("malformed ICE message: {0}")]
    MalformedIce(serde_json::Error),
    /// JSON object carrying neither `sdp` nor `ice`.
    #[error("JSON message carries neither 'sdp' nor 'ice'")]
    UnknownMessage,
}

#[derive(Serialize)]
struct SdpMessage<'a> {
    sdp: &'a SessionDescription,
}

#[derive(Serialize)]
struct IceMessage<'a> {
    ice: &'a [IceCandidate],
}

impl Signal {
    /// Interprets a received body.
    ///
    /// # Errors
    /// Errs when the body is not one of the known control strings and not a JSON
    /// object of a known shape.
    pub fn parse(body: &str) -> Result<Self, SignalError> {
        match body {
            SYN => return Ok(Self::Syn),
            ACK => return Ok(Self::Ack),
            OFFER_REQUEST => return Ok(Self::OfferRequest),
            _ => {}
        }
        if body.starts_with(ERROR_PREFIX) {
            return Ok(Self::Error(body.to_owned()));
        }

        let Value::Object(mut object) = serde_json::from_str::<Value>(body)? else {
            return Err(SignalError::NotAnObject);
        };

        if let Some(sdp) = object.remove("sdp") {
            let Value::Object(mut sdp) = sdp else {
                return Err(SignalError::MalformedSdp("'sdp' is not an object"));
            };
            let kind = match sdp.remove("type") {
                None => return Err(SignalError::MissingSdpType),
                Some(Value::String(kind)) => match kind.as_str() {
                    "offer" => SdpKind::Offer,
                    "answer" => SdpKind::Answer,
                    _ => return Err(SignalError::UnknownSdpType(kind)),
                },
                Some(_) => return Err(SignalError::MalformedSdp("'type' is not a string")),
            };
            let Some(Value::String(text)) = sdp.remove("sdp") else {
                return Err(SignalError::MalformedSdp("missing SDP text"));
            };
            return Ok(Self::Sdp(SessionDescription { kind, sdp: text }));
        }

        if let Some(ice) = object.remove("ice") {
            let candidates = serde_json::from_value(ice).map_err(SignalError::MalformedIce)?;
            return Ok(Self::Ice(candidates));
        }

        Err(SignalError::UnknownMessage)
    }

    /// Text to put into an envelope body.
    ///
    /// # Errors
    /// Errs only if JSON serialization of a description or candidate list fails.
    pub fn to_body(&self) -> Result<String, SignalError> {
        let body = match self {
            Self::Syn => SYN.to_owned(),
            Self::Ack => ACK.to_owned(),
            Self::OfferRequest => OFFER_REQUEST.to_owned(),
            Self::Error(text) => text.clone(),
            Self::Sdp(description) => serde_json::to_string(&SdpMessage { sdp: description })?,
            Self::Ice(candidates) => serde_json::to_string(&IceMessage { ice: candidates })?,
        };
        Ok(body)
    }

    /// Control strings drive the rendezvous, everything else the negotiation.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        matches!(self, Self::Syn | Self::Ack)
    }
}
