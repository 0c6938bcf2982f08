//! Canonical telemetry values as reported by devices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A full snapshot of one device's fields, keyed by field name.
pub type Values = BTreeMap<String, TelemetryValue>;

/// A single typed telemetry field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl TelemetryValue {
    /// Interpret the value as a number.
    ///
    /// Devices frequently report readings as strings (`"230.4"`), so text that
    /// parses as a finite number counts as numeric. Booleans, nulls and
    /// structured values never do.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for TelemetryValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Json(n.into()), Self::Number),
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

/// Convert a JSON object into a [`Values`] map.
#[must_use]
pub fn values_from_object(object: serde_json::Map<String, serde_json::Value>) -> Values {
    object
        .into_iter()
        .map(|(key, value)| (key, TelemetryValue::from(value)))
        .collect()
}

/// Look up `key` in `values` and interpret it as a number.
#[must_use]
pub fn numeric(values: &Values, key: &str) -> Option<f64> {
    values.get(key).and_then(TelemetryValue::as_number)
}
