//! Cost rule: converts a power reading into energy cost at two rates.

use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::error::{DeriveError, ValidationError};
use crate::id::{CostRuleId, DeviceId};

/// Derives energy cost from one numeric field of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRule {
    pub id: CostRuleId,
    pub label: String,
    pub source_device: DeviceIdentity,
    pub source_key: String,
    pub rate_a: f64,
    pub rate_b: f64,
    pub target_topic: String,
    pub target_address: Option<String>,
}

impl CostRule {
    /// Create a builder for constructing a [`CostRule`].
    #[must_use]
    pub fn builder() -> CostRuleBuilder {
        CostRuleBuilder::default()
    }

    /// Whether this rule reads from `device`.
    #[must_use]
    pub fn references(&self, device: &DeviceId) -> bool {
        self.source_device.id == *device
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::Validation`] when the label, source key or
    /// target topic is empty, the source device is incomplete, or a rate is
    /// not finite.
    pub fn validate(&self) -> Result<(), DeriveError> {
        if self.label.is_empty() {
            return Err(ValidationError::EmptyLabel.into());
        }
        self.source_device.validate()?;
        if self.source_key.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        if !self.rate_a.is_finite() {
            return Err(ValidationError::NonFiniteRate { name: "rate_a" }.into());
        }
        if !self.rate_b.is_finite() {
            return Err(ValidationError::NonFiniteRate { name: "rate_b" }.into());
        }
        if self.target_topic.is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`CostRule`].
#[derive(Debug, Default)]
pub struct CostRuleBuilder {
    id: Option<CostRuleId>,
    label: Option<String>,
    source_device: Option<DeviceIdentity>,
    source_key: Option<String>,
    rate_a: Option<f64>,
    rate_b: Option<f64>,
    target_topic: Option<String>,
    target_address: Option<String>,
}

impl CostRuleBuilder {
    #[must_use]
    pub fn id(mut self, id: CostRuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn source(mut self, device: DeviceIdentity, key: impl Into<String>) -> Self {
        self.source_device = Some(device);
        self.source_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn rates(mut self, rate_a: f64, rate_b: f64) -> Self {
        self.rate_a = Some(rate_a);
        self.rate_b = Some(rate_b);
        self
    }

    #[must_use]
    pub fn target_topic(mut self, topic: impl Into<String>) -> Self {
        self.target_topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn target_address(mut self, address: impl Into<String>) -> Self {
        self.target_address = Some(address.into());
        self
    }

    /// Consume the builder, validate, and return a [`CostRule`].
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::Validation`] if required fields are missing or
    /// invalid.
    pub fn build(self) -> Result<CostRule, DeriveError> {
        let rule = CostRule {
            id: self.id.unwrap_or_default(),
            label: self.label.unwrap_or_default(),
            source_device: self
                .source_device
                .unwrap_or_else(|| DeviceIdentity::new("", "")),
            source_key: self.source_key.unwrap_or_default(),
            rate_a: self.rate_a.unwrap_or(0.0),
            rate_b: self.rate_b.unwrap_or(0.0),
            target_topic: self.target_topic.unwrap_or_default(),
            target_address: self.target_address,
        };
        rule.validate()?;
        Ok(rule)
    }
}
