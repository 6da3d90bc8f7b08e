//! NIP-01 wire messages exchanged with a relay.

use serde::{ser::SerializeSeq, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    event::{Event, EventId},
    filter::Filter,
};

/// Frames a client sends to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Box<Event>),
    /// `["REQ", <subscription id>, <filter>...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription id>]`
    Close(String),
}

impl ClientMessage {
    /// Encode as a compact JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Event(ev) => ("EVENT", ev).serialize(serializer),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut seq = serializer.serialize_seq(Some(filters.len() + 2))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(subscription_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            Self::Close(subscription_id) => ("CLOSE", subscription_id).serialize(serializer),
        }
    }
}

/// Frames a relay sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription id>, <event>]`
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok {
        event_id: EventId,
        accepted: bool,
        message: String,
    },
    /// `["EOSE", <subscription id>]`
    EndOfStoredEvents(String),
    /// `["NOTICE", <message>]`
    Notice(String),
    /// `["CLOSED", <subscription id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// Any frame whose tag is not one of the above.
    Unknown { tag: String, frame: Value },
}

impl RelayMessage {
    /// Decode one inbound text frame.
    ///
    /// Unrecognized tags decode to [`RelayMessage::Unknown`]; frames that are
    /// not a tagged array, or whose body does not fit the tag, fail with
    /// [`Error::MalformedFrame`].
    pub fn from_json(text: &str) -> Result<Self> {
        let val: Value = serde_json::from_str(text)
            .map_err(|e| Error::MalformedFrame(format!("not JSON: {e}")))?;
        let arr = val
            .as_array()
            .ok_or_else(|| Error::MalformedFrame("frame is not an array".into()))?;
        let tag = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedFrame("missing message tag".into()))?;
        match tag {
            "EVENT" => {
                let subscription_id = string_at(arr, 1, "EVENT")?;
                let ev_val = arr
                    .get(2)
                    .ok_or_else(|| Error::MalformedFrame("EVENT without event".into()))?;
                let event: Event = serde_json::from_value(ev_val.clone())
                    .map_err(|e| Error::MalformedFrame(format!("EVENT body: {e}")))?;
                Ok(Self::Event {
                    subscription_id,
                    event: Box::new(event),
                })
            }
            "OK" => {
                let event_id = EventId::from_hex(&string_at(arr, 1, "OK")?)
                    .map_err(|e| Error::MalformedFrame(format!("OK event id: {e}")))?;
                let accepted = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::MalformedFrame("OK without boolean".into()))?;
                let message = optional_string_at(arr, 3, "OK")?;
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "EOSE" => Ok(Self::EndOfStoredEvents(string_at(arr, 1, "EOSE")?)),
            "NOTICE" => Ok(Self::Notice(string_at(arr, 1, "NOTICE")?)),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(arr, 1, "CLOSED")?,
                message: optional_string_at(arr, 2, "CLOSED")?,
            }),
            other => Ok(Self::Unknown {
                tag: other.to_string(),
                frame: val.clone(),
            }),
        }
    }

    /// Subscription this message is scoped to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Event {
                subscription_id, ..
            }
            | Self::Closed {
                subscription_id, ..
            } => Some(subscription_id),
            Self::EndOfStoredEvents(subscription_id) => Some(subscription_id),
            Self::Ok { .. } | Self::Notice(_) | Self::Unknown { .. } => None,
        }
    }
}

fn string_at(arr: &[Value], idx: usize, tag: &str) -> Result<String> {
    arr.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedFrame(format!("{tag} expects a string at position {idx}")))
}

/// Trailing human-readable messages are tolerated when absent.
fn optional_string_at(arr: &[Value], idx: usize, tag: &str) -> Result<String> {
    match arr.get(idx) {
        None => Ok(String::new()),
        Some(_) => string_at(arr, idx, tag),
    }
}
