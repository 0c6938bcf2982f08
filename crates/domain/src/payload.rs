//! Payload normalizer: raw bus bytes to a canonical value map.
//!
//! Devices wrap their readings in an envelope whose `value` field is either a
//! JSON-encoded string (double encoding), an object, or missing entirely.

use serde_json::{Map, Value};

use crate::error::PayloadError;
use crate::telemetry::{Values, values_from_object};

/// Where the normalized values were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// `value` was a JSON string holding the real object.
    EncodedString,
    /// `value` was already an object.
    Object,
    /// No `value` field; the envelope itself is the value map.
    Envelope,
    /// `value` was a string that did not decode to an object; the envelope
    /// was used instead.
    EnvelopeFallback,
}

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub values: Values,
    pub source: ValueSource,
}

/// Parse a raw bus payload into its canonical value map.
///
/// # Errors
///
/// Returns [`PayloadError`] when the bytes are not JSON or the top level is
/// not an object.
pub fn normalize(raw: &[u8]) -> Result<Normalized, PayloadError> {
    let envelope = match serde_json::from_slice::<Value>(raw)? {
        Value::Object(map) => map,
        other => return Err(PayloadError::NotAnObject(kind(&other))),
    };

    let (object, source) = match envelope.get("value").cloned() {
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(inner)) => (inner, ValueSource::EncodedString),
            _ => (envelope, ValueSource::EnvelopeFallback),
        },
        Some(Value::Object(inner)) => (inner, ValueSource::Object),
        Some(_) => (envelope, ValueSource::EnvelopeFallback),
        None => (envelope, ValueSource::Envelope),
    };

    Ok(Normalized {
        values: values_from_object(object),
        source,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serialize `fields` as a JSON string, the inner encoding used by `value`.
///
/// # Errors
///
/// Propagates [`serde_json::Error`] from serialization.
pub fn encode_value(fields: &Map<String, Value>) -> Result<String, serde_json::Error> {
    serde_json::to_string(fields)
}
