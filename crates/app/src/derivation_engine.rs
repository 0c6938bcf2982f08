//! Derivation engine: turns a device update into publish intents.
//!
//! For every rule that reads the updated device, operands are resolved from
//! the [`DeviceStateCache`] and fed to the formulas in
//! [`telederive_domain::derivation`]. One rule set snapshot is used for the
//! whole evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use telederive_domain::derivation::{CostBreakdown, EfficiencyReading, sum_present};
use telederive_domain::envelope::{Envelope, PublishIntent};
use telederive_domain::error::DeriveError;
use telederive_domain::id::DeviceId;
use telederive_domain::rule::{CostRule, EfficiencyRule};
use telederive_domain::telemetry::{Values, numeric};
use telederive_domain::time::{Timestamp, now};

use crate::rule_set::RuleSetHandle;
use crate::state_cache::DeviceStateCache;

/// Evaluates the active rules against the cache.
pub struct DerivationEngine {
    rules: Arc<RuleSetHandle>,
    cache: Arc<DeviceStateCache>,
}

impl DerivationEngine {
    #[must_use]
    pub fn new(rules: Arc<RuleSetHandle>, cache: Arc<DeviceStateCache>) -> Self {
        Self { rules, cache }
    }

    /// Evaluate every rule fed by `device`.
    ///
    /// Rules whose operands are missing are skipped (logged at `warn`) and
    /// produce no intent.
    #[must_use]
    pub fn evaluate(&self, device: &DeviceId) -> Vec<PublishIntent> {
        self.evaluate_at(device, now())
    }

    /// [`evaluate`](Self::evaluate) with an explicit envelope timestamp.
    #[must_use]
    pub fn evaluate_at(&self, device: &DeviceId, at: Timestamp) -> Vec<PublishIntent> {
        let rules = self.rules.current();
        let mut intents = Vec::new();

        for rule in rules.cost_rules_for(device) {
            match self.evaluate_cost(rule, at) {
                Ok(intent) => intents.push(intent),
                Err(err) => tracing::warn!(
                    rule = %rule.id,
                    label = %rule.label,
                    error = %err,
                    "skipping cost rule"
                ),
            }
        }

        for rule in rules.efficiency_rules_for(device) {
            intents.push(self.evaluate_efficiency(rule, at));
        }

        tracing::trace!(
            device = %device,
            generation = rules.generation,
            intents = intents.len(),
            "evaluation complete"
        );
        intents
    }

    fn evaluate_cost(&self, rule: &CostRule, at: Timestamp) -> Result<PublishIntent, DeriveError> {
        let power = self
            .cache
            .get(&rule.source_device.id)
            .and_then(|values| numeric(&values, &rule.source_key))
            .ok_or_else(|| DeriveError::MissingOperand {
                rule: rule.label.clone(),
                key: rule.source_key.clone(),
            })?;

        let breakdown = CostBreakdown::compute(power, rule.rate_a, rule.rate_b);
        Ok(PublishIntent {
            topic: rule.target_topic.clone(),
            envelope: Envelope::new(
                at,
                rule.label.clone(),
                rule.target_address.clone(),
                breakdown.to_fields(),
            ),
        })
    }

    fn evaluate_efficiency(&self, rule: &EfficiencyRule, at: Timestamp) -> PublishIntent {
        let states = self.cache.snapshot(rule.devices().map(|device| &device.id));
        let reading = efficiency_reading(rule, &states);

        if reading.main_power.is_none() {
            tracing::debug!(
                rule = %rule.id,
                key = %rule.main_power.key,
                "main power unresolved, publishing N/A"
            );
        }

        PublishIntent {
            topic: rule.output_topic.clone(),
            envelope: Envelope::new(at, rule.label.clone(), None, reading.to_fields()),
        }
    }
}

fn efficiency_reading(
    rule: &EfficiencyRule,
    states: &HashMap<DeviceId, Values>,
) -> EfficiencyReading {
    let main_power = states
        .get(&rule.main_power.device.id)
        .and_then(|values| numeric(values, &rule.main_power.key));

    let terms: Vec<Option<f64>> = rule
        .load_terms
        .iter()
        .map(|term| {
            states.get(&term.device.id).and_then(|values| {
                sum_present(term.keys.iter().map(|key| numeric(values, key)))
            })
        })
        .collect();

    EfficiencyReading::compute(main_power, &terms)
}
