//! Device: a telemetry producer and its last known state.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::DeviceId;
use crate::telemetry::Values;
use crate::time::Timestamp;

/// Identity of a telemetry-producing device: its id and the bus topic it
/// publishes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: DeviceId,
    pub topic: String,
}

impl DeviceIdentity {
    #[must_use]
    pub fn new(id: impl Into<DeviceId>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
        }
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyDeviceId`] or
    /// [`ValidationError::EmptyTopic`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if self.topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        Ok(())
    }
}

/// The last known snapshot of a device.
///
/// Every inbound message replaces `values` wholesale; fields are never merged
/// across messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device: DeviceIdentity,
    pub values: Values,
    pub updated_at: Timestamp,
}

impl DeviceState {
    #[must_use]
    pub fn new(device: DeviceIdentity, values: Values, updated_at: Timestamp) -> Self {
        Self {
            device,
            values,
            updated_at,
        }
    }
}
