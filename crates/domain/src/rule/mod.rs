//! Derivation rules and the rule set that groups them.
//!
//! A [`RuleSet`] is the unit of configuration: it is loaded as a whole from
//! the configuration store and replaced as a whole on reload.

mod cost;
mod efficiency;

pub use cost::{CostRule, CostRuleBuilder};
pub use efficiency::{EfficiencyRule, EfficiencyRuleBuilder, LoadTerm, PowerSource};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::error::{DeriveError, ValidationError};
use crate::id::DeviceId;

/// The full collection of active rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Increases by one every time a new set replaces the active one.
    pub generation: u64,
    pub cost_rules: Vec<CostRule>,
    pub efficiency_rules: Vec<EfficiencyRule>,
}

impl RuleSet {
    /// Create a generation-zero set, ordering rules by id so that two loads
    /// of the same records compare equal.
    #[must_use]
    pub fn new(mut cost_rules: Vec<CostRule>, mut efficiency_rules: Vec<EfficiencyRule>) -> Self {
        cost_rules.sort_by_key(|rule| rule.id);
        efficiency_rules.sort_by_key(|rule| rule.id);
        Self {
            generation: 0,
            cost_rules,
            efficiency_rules,
        }
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cost_rules.is_empty() && self.efficiency_rules.is_empty()
    }

    /// Whether both sets hold the same rules, ignoring the generation.
    #[must_use]
    pub fn same_rules(&self, other: &Self) -> bool {
        self.cost_rules == other.cost_rules && self.efficiency_rules == other.efficiency_rules
    }

    /// Every device referenced by any rule.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.cost_rules
            .iter()
            .map(|rule| &rule.source_device)
            .chain(self.efficiency_rules.iter().flat_map(|rule| rule.devices()))
    }

    /// Distinct device identities referenced by the set.
    #[must_use]
    pub fn distinct_devices(&self) -> BTreeSet<DeviceIdentity> {
        self.devices().cloned().collect()
    }

    /// Topics the bus client must be subscribed to for this set.
    #[must_use]
    pub fn required_topics(&self) -> BTreeSet<String> {
        self.devices().map(|device| device.topic.clone()).collect()
    }

    /// Cost rules fed by `device`.
    pub fn cost_rules_for<'a>(&'a self, device: &'a DeviceId) -> impl Iterator<Item = &'a CostRule> {
        self.cost_rules.iter().filter(move |rule| rule.references(device))
    }

    /// Efficiency rules fed by `device`.
    pub fn efficiency_rules_for<'a>(
        &'a self,
        device: &'a DeviceId,
    ) -> impl Iterator<Item = &'a EfficiencyRule> {
        self.efficiency_rules
            .iter()
            .filter(move |rule| rule.references(device))
    }

    /// Check every rule and the one-topic-per-device invariant.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeriveError::Validation`] found.
    pub fn validate(&self) -> Result<(), DeriveError> {
        for rule in &self.cost_rules {
            rule.validate()?;
        }
        for rule in &self.efficiency_rules {
            rule.validate()?;
        }

        let mut topics: BTreeMap<&DeviceId, &str> = BTreeMap::new();
        for device in self.devices() {
            match topics.get(&device.id) {
                Some(first) if *first != device.topic => {
                    return Err(ValidationError::ConflictingTopic {
                        device: device.id.to_string(),
                        first: (*first).to_string(),
                        second: device.topic.clone(),
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    topics.insert(&device.id, &device.topic);
                }
            }
        }
        Ok(())
    }
}
