//! Outbound wire envelope for derived results.
//!
//! The inner `value` is serialized as a JSON *string*, matching the double
//! encoding upstream devices use, so consumers can parse both the same way.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::payload::encode_value;
use crate::time::{Timestamp, to_iso8601};

/// A derived result ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub timestamp: Timestamp,
    pub label: String,
    pub address: Option<String>,
    pub value: Map<String, Value>,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    timestamp: String,
    label: &'a str,
    address: Option<&'a str>,
    value: String,
}

impl Envelope {
    #[must_use]
    pub fn new(
        timestamp: Timestamp,
        label: impl Into<String>,
        address: Option<String>,
        value: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp,
            label: label.into(),
            address,
            value,
        }
    }

    /// Serialize to the bytes published on the bus.
    ///
    /// # Errors
    ///
    /// Propagates [`serde_json::Error`] from serialization.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireEnvelope {
            timestamp: to_iso8601(self.timestamp),
            label: &self.label,
            address: self.address.as_deref(),
            value: encode_value(&self.value)?,
        })
    }
}

/// A request to publish `envelope` on `topic`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishIntent {
    pub topic: String,
    pub envelope: Envelope,
}
