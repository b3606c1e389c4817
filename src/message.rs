//! JSON tuple codec for the client↔relay wire protocol.
//!
//! Both directions are JSON arrays whose first element is a string
//! discriminant. Decoding is strict: anything that does not match the
//! expected shape fails with a decode error carrying the raw JSON so an
//! operator can see exactly what the peer sent.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::Filter;

/// Messages sent from the client to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["REQ", subId, filter…]`
    Req { sub_id: String, filters: Vec<Filter> },
    /// `["COUNT", subId, filter…]`
    Count { sub_id: String, filters: Vec<Filter> },
    /// `["CLOSE", subId]`
    Close { sub_id: String },
    /// `["EVENT", event]`
    Event(Event),
}

/// Messages sent from a relay to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", subId, event]`
    Event { sub_id: String, event: Event },
    /// `["OK", eventId, accepted, message]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["EOSE", subId]`
    Eose { sub_id: String },
    /// `["CLOSED", subId, message]`
    Closed { sub_id: String, message: String },
    /// `["NOTICE", message]`
    Notice { message: String },
    /// `["COUNT", subId, {"count": n}]`
    Count { sub_id: String, count: u64 },
}

fn decode_err(reason: impl Into<String>, raw: &str) -> Error {
    Error::Decode {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

/// Parse the outer array and discriminant shared by both directions.
fn parse_frame(text: &str) -> Result<(String, Vec<Value>)> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| decode_err(e.to_string(), text))?;
    let arr = value
        .as_array()
        .ok_or_else(|| decode_err("message is not an array", text))?;
    let kind = arr
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| decode_err("missing string discriminant", text))?;
    Ok((kind.to_string(), arr[1..].to_vec()))
}

fn parse_sub_id(value: Option<&Value>, raw: &str) -> Result<String> {
    let sub_id = value
        .and_then(Value::as_str)
        .ok_or_else(|| decode_err("subscription id is not a string", raw))?;
    if sub_id.is_empty() {
        return Err(decode_err("subscription id is empty", raw));
    }
    Ok(sub_id.to_string())
}

impl ClientMessage {
    /// Encode as a single JSON text frame.
    pub fn encode(&self) -> String {
        let value = match self {
            ClientMessage::Req { sub_id, filters } => {
                let mut arr = vec![json!("REQ"), json!(sub_id)];
                arr.extend(filters.iter().map(|f| json!(f)));
                Value::Array(arr)
            }
            ClientMessage::Count { sub_id, filters } => {
                let mut arr = vec![json!("COUNT"), json!(sub_id)];
                arr.extend(filters.iter().map(|f| json!(f)));
                Value::Array(arr)
            }
            ClientMessage::Close { sub_id } => json!(["CLOSE", sub_id]),
            ClientMessage::Event(ev) => json!(["EVENT", ev]),
        };
        value.to_string()
    }

    /// Decode a client-direction frame.
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, rest) = parse_frame(text)?;
        match kind.as_str() {
            "REQ" | "COUNT" => {
                let sub_id = parse_sub_id(rest.first(), text)?;
                if rest.len() < 2 {
                    return Err(decode_err("subscription without filters", text));
                }
                let filters = rest[1..]
                    .iter()
                    .map(|v| serde_json::from_value(v.clone()))
                    .collect::<std::result::Result<Vec<Filter>, _>>()
                    .map_err(|e| decode_err(format!("bad filter: {e}"), text))?;
                if kind == "REQ" {
                    Ok(ClientMessage::Req { sub_id, filters })
                } else {
                    Ok(ClientMessage::Count { sub_id, filters })
                }
            }
            "CLOSE" => Ok(ClientMessage::Close {
                sub_id: parse_sub_id(rest.first(), text)?,
            }),
            "EVENT" => {
                let ev = rest
                    .first()
                    .ok_or_else(|| decode_err("EVENT without payload", text))?;
                let event: Event = serde_json::from_value(ev.clone())
                    .map_err(|e| decode_err(format!("bad event: {e}"), text))?;
                Ok(ClientMessage::Event(event))
            }
            other => Err(Error::Protocol(format!(
                "unexpected client message discriminant {other:?}"
            ))),
        }
    }
}

impl RelayMessage {
    /// Encode as a single JSON text frame.
    pub fn encode(&self) -> String {
        let value = match self {
            RelayMessage::Event { sub_id, event } => json!(["EVENT", sub_id, event]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Eose { sub_id } => json!(["EOSE", sub_id]),
            RelayMessage::Closed { sub_id, message } => json!(["CLOSED", sub_id, message]),
            RelayMessage::Notice { message } => json!(["NOTICE", message]),
            RelayMessage::Count { sub_id, count } => {
                json!(["COUNT", sub_id, { "count": count }])
            }
        };
        value.to_string()
    }

    /// Decode a relay-direction frame.
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, rest) = parse_frame(text)?;
        match kind.as_str() {
            "EVENT" => {
                let sub_id = parse_sub_id(rest.first(), text)?;
                let ev = rest
                    .get(1)
                    .ok_or_else(|| decode_err("EVENT without payload", text))?;
                let event: Event = serde_json::from_value(ev.clone())
                    .map_err(|e| decode_err(format!("bad event: {e}"), text))?;
                Ok(RelayMessage::Event { sub_id, event })
            }
            "OK" => {
                let event_id = rest
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_err("OK without event id", text))?
                    .to_string();
                let accepted = rest
                    .get(1)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| decode_err("OK acceptance is not a bool", text))?;
                let message = rest
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_err("OK without message", text))?
                    .to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                sub_id: parse_sub_id(rest.first(), text)?,
            }),
            "CLOSED" => {
                let sub_id = parse_sub_id(rest.first(), text)?;
                let message = rest
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_err("CLOSED without message", text))?
                    .to_string();
                Ok(RelayMessage::Closed { sub_id, message })
            }
            "NOTICE" => {
                let message = rest
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_err("NOTICE without message", text))?
                    .to_string();
                Ok(RelayMessage::Notice { message })
            }
            "COUNT" => {
                let sub_id = parse_sub_id(rest.first(), text)?;
                let count = rest
                    .get(1)
                    .and_then(|v| v.get("count"))
                    .and_then(Value::as_u64)
                    .ok_or_else(|| decode_err("COUNT without numeric count", text))?;
                Ok(RelayMessage::Count { sub_id, count })
            }
            other => Err(Error::Protocol(format!(
                "unexpected relay message discriminant {other:?}"
            ))),
        }
    }

    /// The subscription id this message is addressed to, if any.
    pub fn sub_id(&self) -> Option<&str> {
        match self {
            RelayMessage::Event { sub_id, .. }
            | RelayMessage::Eose { sub_id }
            | RelayMessage::Closed { sub_id, .. }
            | RelayMessage::Count { sub_id, .. } => Some(sub_id),
            RelayMessage::Ok { .. } | RelayMessage::Notice { .. } => None,
        }
    }
}
