//! Drawing-event protocol.
//!
//! Identifiers for sessions and participants, the [`DrawEvent`] variant, and
//! the JSON wire codec shared by every client in a session.
//!
//! Wire format (one JSON object per relay message):
//! ```json
//! { "senderId": "A1", "prevX": 10, "prevY": 10, "currX": 20, "currY": 20,
//!   "erase": false, "eraseBoard": false }
//! ```

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Prefix of every session topic on the relay.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Identifier of a shared drawing session. Scopes exactly one relay topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id still produces a topic, but nobody else will be on it.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The relay topic for this session, `/topic/<id>`.
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one engine instance, stamped on every outgoing event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a fresh random participant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single pointer-drag step, from the previous sample to the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeSegment {
    pub prev: Point,
    pub curr: Point,
    /// Paint with the eraser instead of the pen.
    pub erase: bool,
    pub sender: ParticipantId,
}

/// The unit of synchronization between participants.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawEvent {
    StrokeSegment(StrokeSegment),
    ClearBoard { sender: ParticipantId },
}

impl DrawEvent {
    /// Originator of the event.
    pub fn sender(&self) -> &ParticipantId {
        match self {
            DrawEvent::StrokeSegment(segment) => &segment.sender,
            DrawEvent::ClearBoard { sender } => sender,
        }
    }

    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        self.sender() == participant
    }
}

/// Errors produced while decoding an inbound payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload has no senderId")]
    MissingSender,
    #[error("Stroke payload is missing field {0}")]
    MissingField(&'static str),
}

/// Errors produced while encoding an outgoing event.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to serialize event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Coordinate is not finite: {0}")]
    NonFinite(f64),
}

/// Outgoing wire shape. Every field is always written.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    sender_id: &'a str,
    prev_x: f64,
    prev_y: f64,
    curr_x: f64,
    curr_y: f64,
    erase: bool,
    erase_board: bool,
}

/// Incoming wire shape. Presence is checked after parsing so that a missing
/// field is reported by name instead of as a generic serde error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn {
    sender_id: Option<String>,
    prev_x: Option<f64>,
    prev_y: Option<f64>,
    curr_x: Option<f64>,
    curr_y: Option<f64>,
    #[serde(default)]
    erase: bool,
    #[serde(default)]
    erase_board: bool,
}

/// Encode an event into its JSON wire form.
pub fn encode(event: &DrawEvent) -> Result<String, EncodeError> {
    let wire = match event {
        DrawEvent::StrokeSegment(segment) => {
            for value in [segment.prev.x, segment.prev.y, segment.curr.x, segment.curr.y] {
                if !value.is_finite() {
                    return Err(EncodeError::NonFinite(value));
                }
            }
            WireOut {
                sender_id: segment.sender.as_str(),
                prev_x: segment.prev.x,
                prev_y: segment.prev.y,
                curr_x: segment.curr.x,
                curr_y: segment.curr.y,
                erase: segment.erase,
                erase_board: false,
            }
        }
        DrawEvent::ClearBoard { sender } => WireOut {
            sender_id: sender.as_str(),
            prev_x: 0.0,
            prev_y: 0.0,
            curr_x: 0.0,
            curr_y: 0.0,
            erase: false,
            erase_board: true,
        },
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode a JSON wire payload.
///
/// `senderId` is mandatory and must be non-empty. A payload with
/// `eraseBoard = true` is a clear regardless of its coordinates; any other
/// payload must carry all four coordinates.
pub fn decode(raw: &str) -> Result<DrawEvent, DecodeError> {
    let wire: WireIn = serde_json::from_str(raw)?;

    let sender = match wire.sender_id {
        Some(id) if !id.is_empty() => ParticipantId::from(id),
        _ => return Err(DecodeError::MissingSender),
    };

    if wire.erase_board {
        return Ok(DrawEvent::ClearBoard { sender });
    }

    let prev_x = wire.prev_x.ok_or(DecodeError::MissingField("prevX"))?;
    let prev_y = wire.prev_y.ok_or(DecodeError::MissingField("prevY"))?;
    let curr_x = wire.curr_x.ok_or(DecodeError::MissingField("currX"))?;
    let curr_y = wire.curr_y.ok_or(DecodeError::MissingField("currY"))?;

    Ok(DrawEvent::StrokeSegment(StrokeSegment {
        prev: Point::new(prev_x, prev_y),
        curr: Point::new(curr_x, curr_y),
        erase: wire.erase,
        sender,
    }))
}
