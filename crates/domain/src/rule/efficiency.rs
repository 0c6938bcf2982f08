//! Efficiency (PUE) rule: main power divided by the aggregated IT load.

use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::error::{DeriveError, ValidationError};
use crate::id::{DeviceId, EfficiencyRuleId};

/// A single device field used as an operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSource {
    pub device: DeviceIdentity,
    pub key: String,
}

/// One numerator term: the sum of `keys` on `device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTerm {
    pub device: DeviceIdentity,
    pub keys: Vec<String>,
}

/// Derives power-usage-efficiency from one reference reading and a set of
/// load terms spread across devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRule {
    pub id: EfficiencyRuleId,
    pub label: String,
    pub main_power: PowerSource,
    pub load_terms: Vec<LoadTerm>,
    pub output_topic: String,
}

impl EfficiencyRule {
    /// Create a builder for constructing an [`EfficiencyRule`].
    #[must_use]
    pub fn builder() -> EfficiencyRuleBuilder {
        EfficiencyRuleBuilder::default()
    }

    /// Whether this rule reads from `device`, as main power or as a load term.
    #[must_use]
    pub fn references(&self, device: &DeviceId) -> bool {
        self.main_power.device.id == *device
            || self.load_terms.iter().any(|term| term.device.id == *device)
    }

    /// Every device this rule reads from, main power first.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceIdentity> {
        std::iter::once(&self.main_power.device)
            .chain(self.load_terms.iter().map(|term| &term.device))
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::Validation`] when the label, main key or output
    /// topic is empty, a device identity is incomplete, or a load term lists
    /// no keys.
    pub fn validate(&self) -> Result<(), DeriveError> {
        if self.label.is_empty() {
            return Err(ValidationError::EmptyLabel.into());
        }
        self.main_power.device.validate()?;
        if self.main_power.key.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        for term in &self.load_terms {
            term.device.validate()?;
            if term.keys.is_empty() {
                return Err(ValidationError::EmptyLoadTerm {
                    device: term.device.id.to_string(),
                }
                .into());
            }
            if term.keys.iter().any(String::is_empty) {
                return Err(ValidationError::EmptyKey.into());
            }
        }
        if self.output_topic.is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`EfficiencyRule`].
#[derive(Debug, Default)]
pub struct EfficiencyRuleBuilder {
    id: Option<EfficiencyRuleId>,
    label: Option<String>,
    main_power: Option<PowerSource>,
    load_terms: Vec<LoadTerm>,
    output_topic: Option<String>,
}

impl EfficiencyRuleBuilder {
    #[must_use]
    pub fn id(mut self, id: EfficiencyRuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn main_power(mut self, device: DeviceIdentity, key: impl Into<String>) -> Self {
        self.main_power = Some(PowerSource {
            device,
            key: key.into(),
        });
        self
    }

    #[must_use]
    pub fn load_term<I, K>(mut self, device: DeviceIdentity, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.load_terms.push(LoadTerm {
            device,
            keys: keys.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn output_topic(mut self, topic: impl Into<String>) -> Self {
        self.output_topic = Some(topic.into());
        self
    }

    /// Consume the builder, validate, and return an [`EfficiencyRule`].
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::Validation`] if required fields are missing or
    /// invalid.
    pub fn build(self) -> Result<EfficiencyRule, DeriveError> {
        let rule = EfficiencyRule {
            id: self.id.unwrap_or_default(),
            label: self.label.unwrap_or_default(),
            main_power: self.main_power.unwrap_or_else(|| PowerSource {
                device: DeviceIdentity::new("", ""),
                key: String::new(),
            }),
            load_terms: self.load_terms,
            output_topic: self.output_topic.unwrap_or_default(),
        };
        rule.validate()?;
        Ok(rule)
    }
}
