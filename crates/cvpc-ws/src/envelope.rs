//! MessagePack event envelope.
//!
//! Every frame exchanged with the peer is a MessagePack map with two keys:
//!
//! ```text
//! { "type": <string>, "data": <any> }
//! ```
//!
//! Decoding is lenient: a missing `type` becomes `"unknown"` and a missing
//! `data` becomes an empty map. Encoding always writes both keys.
//!
//! `data` is an [`rmpv::Value`], so binary and extension values inside it
//! pass through unchanged in both directions.

pub use rmpv::Value;
use rmpv::ValueRef;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EnvelopeError;

/// Event type used when an inbound envelope carries no `type`.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// A typed event exchanged with the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Event type name used for dispatch.
    pub event_type: String,
    /// Arbitrary structured payload.
    pub data: Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Encode as a MessagePack map with string keys.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode_event(&self.event_type, &self.data)
    }

    /// Decode one MessagePack payload.
    ///
    /// Later duplicates of `type` or `data` win. Keys other than those two
    /// are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut rest = bytes;
        let value = rmpv::decode::read_value(&mut rest)?;
        if !rest.is_empty() {
            return Err(EnvelopeError::TrailingBytes { len: rest.len() });
        }
        let Value::Map(entries) = value else {
            return Err(EnvelopeError::NotAMap {
                kind: value_kind(&value),
            });
        };

        let mut event_type = None;
        let mut data = None;
        for (key, value) in entries {
            match key.as_str() {
                Some("type") => event_type = Some(value),
                Some("data") => data = Some(value),
                _ => {}
            }
        }

        let event_type = match event_type {
            None => UNKNOWN_EVENT_TYPE.to_string(),
            Some(Value::String(s)) => s
                .into_str()
                .ok_or(EnvelopeError::InvalidType { kind: "non-utf8 string" })?,
            Some(other) => {
                return Err(EnvelopeError::InvalidType {
                    kind: value_kind(&other),
                });
            }
        };
        let data = data.unwrap_or_else(|| Value::Map(Vec::new()));

        Ok(Self { event_type, data })
    }
}

/// Encode a `{type, data}` pair without building an owned [`Envelope`].
pub fn encode_event(event_type: &str, data: &Value) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = ValueRef::Map(vec![
        (ValueRef::from("type"), ValueRef::from(event_type)),
        (ValueRef::from("data"), data.as_ref()),
    ]);
    let mut buf = Vec::new();
    rmpv::encode::write_value_ref(&mut buf, &envelope)?;
    Ok(buf)
}

/// Convert any serializable value into event data.
pub fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value, EnvelopeError> {
    Ok(rmpv::ext::to_value(data)?)
}

/// Deserialize event data into a concrete type.
pub fn from_value<T: DeserializeOwned>(data: Value) -> Result<T, EnvelopeError> {
    Ok(rmpv::ext::from_value(data)?)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) | Value::F32(_) | Value::F64(_) => "number",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}
