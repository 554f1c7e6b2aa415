#![forbid(unsafe_code)]

mod events;

use serde::{Deserialize, Serialize};

pub use events::{Ack, ClientEvent, FieldError, ServerEvent};

/// Current gateway envelope version.
pub const PROTOCOL_VERSION: u16 = 1;
/// Maximum allowed gateway payload bytes.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;
/// Maximum length of a request correlation id.
pub const MAX_CORRELATION_ID_CHARS: usize = 64;
/// Maximum length of an event name.
pub const MAX_EVENT_TYPE_CHARS: usize = 64;

/// Versioned gateway envelope. All frames use `{ v, t, id?, d }`; `id` is the
/// correlation id carried by requests and echoed by their `ack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope<T> {
    pub v: u16,
    pub t: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default)]
    pub d: T,
}

/// Event name: lowercase ascii, digits, `_` and `.` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventType {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = !value.is_empty()
            && value.len() <= MAX_EVENT_TYPE_CHARS
            && value
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.'));
        if well_formed {
            Ok(Self(value))
        } else {
            Err(ProtocolError::InvalidEventType)
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

/// Client-chosen request id, echoed verbatim in the matching `ack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty()
            || value.len() > MAX_CORRELATION_ID_CHARS
            || value.chars().any(char::is_control)
        {
            return Err(ProtocolError::InvalidCorrelationId);
        }
        Ok(Self(value))
    }
}

impl From<CorrelationId> for String {
    fn from(value: CorrelationId) -> Self {
        value.0
    }
}

/// Inbound frame as it arrives, before the event name is checked.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    v: u16,
    t: String,
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(default)]
    d: serde_json::Value,
}

/// Decodes one inbound frame. The payload `d` is left as raw JSON for the
/// event handler to validate.
///
/// # Errors
/// Returns [`ProtocolError`] for frames over [`MAX_EVENT_BYTES`], malformed
/// JSON (including bad correlation ids) and versions other than
/// [`PROTOCOL_VERSION`]. A well-formed frame whose event name is not a valid
/// [`EventType`] yields [`ProtocolError::UnrecognizedEventName`], which keeps
/// the correlation id so the request can still be answered.
pub fn parse_envelope(input: &[u8]) -> Result<Envelope<serde_json::Value>, ProtocolError> {
    let actual = input.len();
    if actual > MAX_EVENT_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_EVENT_BYTES,
            actual,
        });
    }

    let wire = serde_json::from_slice::<WireEnvelope>(input)?;
    if wire.v != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            actual: wire.v,
        });
    }
    if let Ok(t) = EventType::try_from(wire.t.clone()) {
        return Ok(Envelope {
            v: wire.v,
            t,
            id: wire.id,
            d: wire.d,
        });
    }
    Err(ProtocolError::UnrecognizedEventName {
        name: wire.t.chars().take(MAX_EVENT_TYPE_CHARS).collect(),
        id: wire.id,
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame of {actual} bytes exceeds the {max} byte limit")]
    OversizedPayload { max: usize, actual: usize },
    #[error("envelope version {actual} is not supported (expected {expected})")]
    UnsupportedVersion { expected: u16, actual: u16 },
    #[error("invalid event type")]
    InvalidEventType,
    #[error("event name is not a valid event type")]
    UnrecognizedEventName {
        name: String,
        id: Option<CorrelationId>,
    },
    #[error("invalid correlation id")]
    InvalidCorrelationId,
    #[error("frame is not a valid envelope")]
    InvalidJson,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
